//! Wiring of the core services from configuration.

use std::sync::Arc;

use localdeals_db_memory::{InMemoryKvStore, InMemoryShopStore, InMemoryVoucherStore};
use localdeals_db_postgres::{PgShopStore, PgVoucherStore, PostgresError, create_pool};
use localdeals_storage::{KvStore, ShopStore, VoucherStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheClient, CacheSettings, RebuildPool};
use crate::config::AppConfig;
use crate::id_worker::IdWorker;
use crate::kv::create_kv_store;
use crate::lock::DistributedLock;
use crate::seckill::SeckillService;
use crate::shop::ShopService;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("PostgreSQL initialization failed: {0}")]
    Postgres(#[from] PostgresError),
}

/// Every service of the core, sharing one key-value store and one rebuild
/// pool.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub lock: DistributedLock,
    pub ids: IdWorker,
    pub cache: CacheClient,
    pub shops: ShopService,
    pub seckill: SeckillService,
}

impl AppState {
    /// Connects to Redis (or falls back to memory) and to PostgreSQL when
    /// configured; otherwise vouchers and shops live in memory.
    pub async fn connect(config: &AppConfig) -> Result<Self, BootstrapError> {
        config.validate().map_err(BootstrapError::Config)?;

        let kv = create_kv_store(&config.redis).await;

        let (vouchers, shops): (Arc<dyn VoucherStore>, Arc<dyn ShopStore>) =
            match config.postgres {
                Some(ref pg) => {
                    let pool = create_pool(pg).await?;
                    info!("Using PostgreSQL voucher and shop stores");
                    (
                        Arc::new(PgVoucherStore::new(pool.clone())),
                        Arc::new(PgShopStore::new(pool)),
                    )
                }
                None => {
                    warn!("postgres not configured, vouchers and shops are kept in memory");
                    (
                        Arc::new(InMemoryVoucherStore::new()),
                        Arc::new(InMemoryShopStore::new()),
                    )
                }
            };

        Ok(Self::assemble(config, kv, vouchers, shops))
    }

    /// Builds the whole graph over caller-supplied in-memory backends.
    pub fn in_memory(
        config: &AppConfig,
        vouchers: InMemoryVoucherStore,
        shops: InMemoryShopStore,
    ) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryKvStore::new()),
            Arc::new(vouchers),
            Arc::new(shops),
        )
    }

    pub fn assemble(
        config: &AppConfig,
        kv: Arc<dyn KvStore>,
        vouchers: Arc<dyn VoucherStore>,
        shops: Arc<dyn ShopStore>,
    ) -> Self {
        let lock = DistributedLock::new(Arc::clone(&kv));
        let ids = IdWorker::new(Arc::clone(&kv));
        let cache = CacheClient::new(
            Arc::clone(&kv),
            lock.clone(),
            RebuildPool::new(config.cache.rebuild_workers),
            CacheSettings::from(&config.cache),
        );
        let shops = ShopService::new(shops, cache.clone(), &config.cache);
        let seckill = SeckillService::new(vouchers, ids.clone(), lock.clone(), config.seckill.clone());

        info!(
            shop_strategy = ?config.cache.shop_strategy,
            order_guard = ?config.seckill.order_guard,
            rebuild_workers = config.cache.rebuild_workers,
            "localdeals core assembled"
        );

        Self {
            kv,
            lock,
            ids,
            cache,
            shops,
            seckill,
        }
    }

    /// Stops accepting rebuilds and waits for running ones.
    pub async fn shutdown(&self) {
        self.cache.rebuild_pool().shutdown().await;
    }
}
