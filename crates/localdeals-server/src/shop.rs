//! Shop reads behind the cache and write-then-invalidate updates.

use std::sync::Arc;
use std::time::Duration;

use localdeals_storage::{Shop, ShopStore, StorageError};
use thiserror::Error;
use tracing::{info, instrument};

use crate::cache::{CacheClient, CacheError, cache_key};
use crate::config::{CacheConfig, CacheStrategy};

pub const CACHE_SHOP_KEY: &str = "cache:shop:";

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("shop {0} not found")]
    NotFound(i64),

    #[error("shop id is missing")]
    MissingId,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("shop store error: {0}")]
    Store(#[from] StorageError),
}

#[derive(Clone)]
pub struct ShopService {
    shops: Arc<dyn ShopStore>,
    cache: CacheClient,
    strategy: CacheStrategy,
    ttl: Duration,
    logical_ttl: Duration,
}

impl ShopService {
    pub fn new(shops: Arc<dyn ShopStore>, cache: CacheClient, config: &CacheConfig) -> Self {
        Self {
            shops,
            cache,
            strategy: config.shop_strategy,
            ttl: config.shop_ttl(),
            logical_ttl: config.logical_ttl(),
        }
    }

    /// Loads a shop through the configured cache strategy.
    #[instrument(skip(self))]
    pub async fn query_by_id(&self, id: i64) -> Result<Shop, ShopError> {
        let shops = Arc::clone(&self.shops);
        let loader = move |id: i64| async move { shops.get_shop(id).await };

        let shop = match self.strategy {
            CacheStrategy::PassThrough => {
                self.cache
                    .query_with_pass_through(CACHE_SHOP_KEY, id, loader, self.ttl)
                    .await?
            }
            CacheStrategy::Mutex => {
                self.cache
                    .query_with_mutex(CACHE_SHOP_KEY, id, loader, self.ttl)
                    .await?
            }
            CacheStrategy::LogicalExpire => {
                self.cache
                    .query_with_logical_expire(CACHE_SHOP_KEY, id, loader, self.logical_ttl)
                    .await?
            }
        };
        shop.ok_or(ShopError::NotFound(id))
    }

    /// Writes the shop to the store, then drops its cache entry.
    ///
    /// Logical-expiry entries are rewritten instead, since that strategy
    /// never falls back to the store on a miss.
    #[instrument(skip(self, shop), fields(shop_id = shop.id))]
    pub async fn update(&self, shop: &Shop) -> Result<(), ShopError> {
        if shop.id <= 0 {
            return Err(ShopError::MissingId);
        }
        self.shops.update_shop(shop).await.map_err(|e| {
            if e.is_not_found() {
                ShopError::NotFound(shop.id)
            } else {
                ShopError::Store(e)
            }
        })?;

        let key = cache_key(CACHE_SHOP_KEY, shop.id);
        match self.strategy {
            CacheStrategy::LogicalExpire => {
                self.cache
                    .set_with_logical_expire(&key, shop, self.logical_ttl)
                    .await?
            }
            CacheStrategy::PassThrough | CacheStrategy::Mutex => {
                self.cache.invalidate(&key).await?;
            }
        }
        Ok(())
    }

    /// Seeds logical-expiry entries for `ids`. Missing shops are skipped.
    ///
    /// Returns how many entries were written.
    pub async fn preheat(&self, ids: &[i64]) -> Result<usize, ShopError> {
        let mut warmed = 0;
        for &id in ids {
            if let Some(shop) = self.shops.get_shop(id).await? {
                self.cache
                    .set_with_logical_expire(&cache_key(CACHE_SHOP_KEY, id), &shop, self.logical_ttl)
                    .await?;
                warmed += 1;
            }
        }
        info!(requested = ids.len(), warmed, "shop cache preheated");
        Ok(warmed)
    }
}
