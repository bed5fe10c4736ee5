use localdeals_db_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis configuration. Without it the in-memory key-value store is used.
    #[serde(default)]
    pub redis: RedisConfig,
    /// PostgreSQL settings. `None` keeps vouchers and shops in memory.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Redis validation
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if let Some(ref pg) = self.postgres {
            if pg.url.is_empty() {
                return Err("postgres.url must not be empty".into());
            }
            if pg.pool_size == 0 {
                return Err("postgres.pool_size must be > 0".into());
            }
        }
        // Cache validation
        let cache = &self.cache;
        if cache.null_ttl_secs == 0 {
            return Err("cache.null_ttl_secs must be > 0".into());
        }
        if cache.logical_ttl_secs == 0 {
            return Err("cache.logical_ttl_secs must be > 0".into());
        }
        if cache.lock_ttl_secs == 0 {
            return Err("cache.lock_ttl_secs must be > 0".into());
        }
        if cache.rebuild_workers == 0 {
            return Err("cache.rebuild_workers must be > 0".into());
        }
        if cache.mutex_max_attempts == 0 {
            return Err("cache.mutex_max_attempts must be > 0".into());
        }
        if cache.mutex_retry_interval_ms > cache.mutex_max_backoff_ms {
            return Err("cache.mutex_retry_interval_ms must be <= cache.mutex_max_backoff_ms".into());
        }
        // Seckill validation
        if self.seckill.id_prefix.is_empty() || self.seckill.id_prefix.contains(':') {
            return Err("seckill.id_prefix must be non-empty and must not contain ':'".into());
        }
        if self.seckill.order_lock_ttl_secs == 0 {
            return Err("seckill.order_lock_ttl_secs must be > 0".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Which cache strategy serves shop-by-id reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    #[default]
    PassThrough,
    Mutex,
    LogicalExpire,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Physical TTL of "confirmed absent" tombstones
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,

    #[serde(default = "default_shop_ttl_secs")]
    pub shop_ttl_secs: u64,

    /// Logical TTL used by the logical-expiry strategy and by preheat
    #[serde(default = "default_logical_ttl_secs")]
    pub logical_ttl_secs: u64,

    /// TTL of rebuild locks; bounds how long a crashed holder blocks rebuilds
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_mutex_max_attempts")]
    pub mutex_max_attempts: u32,

    /// First backoff interval; doubles per failed attempt
    #[serde(default = "default_mutex_retry_interval_ms")]
    pub mutex_retry_interval_ms: u64,

    #[serde(default = "default_mutex_max_backoff_ms")]
    pub mutex_max_backoff_ms: u64,

    #[serde(default = "default_rebuild_workers")]
    pub rebuild_workers: usize,

    #[serde(default)]
    pub shop_strategy: CacheStrategy,
}

fn default_null_ttl_secs() -> u64 {
    120
}
fn default_shop_ttl_secs() -> u64 {
    1800
}
fn default_logical_ttl_secs() -> u64 {
    20
}
fn default_lock_ttl_secs() -> u64 {
    10
}
fn default_mutex_max_attempts() -> u32 {
    40
}
fn default_mutex_retry_interval_ms() -> u64 {
    50
}
fn default_mutex_max_backoff_ms() -> u64 {
    500
}
fn default_rebuild_workers() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            null_ttl_secs: default_null_ttl_secs(),
            shop_ttl_secs: default_shop_ttl_secs(),
            logical_ttl_secs: default_logical_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            mutex_max_attempts: default_mutex_max_attempts(),
            mutex_retry_interval_ms: default_mutex_retry_interval_ms(),
            mutex_max_backoff_ms: default_mutex_max_backoff_ms(),
            rebuild_workers: default_rebuild_workers(),
            shop_strategy: CacheStrategy::default(),
        }
    }
}

impl CacheConfig {
    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }
    pub fn shop_ttl(&self) -> Duration {
        Duration::from_secs(self.shop_ttl_secs)
    }
    pub fn logical_ttl(&self) -> Duration {
        Duration::from_secs(self.logical_ttl_secs)
    }
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.mutex_retry_interval_ms)
    }
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.mutex_max_backoff_ms)
    }
}

/// How the purchase pipeline keeps one order per user and voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderGuard {
    /// Rely on the store's conditional insert alone.
    #[default]
    Constraint,
    /// Also hold `lock:order:{user}:{voucher}` around check-then-place.
    ///
    /// A purchase that finds the lock taken is rejected as a duplicate even
    /// if the in-flight one later fails, so the user may end with no order.
    UserLock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeckillConfig {
    #[serde(default)]
    pub order_guard: OrderGuard,
    #[serde(default = "default_order_lock_ttl_secs")]
    pub order_lock_ttl_secs: u64,
    /// Key-space prefix for order IDs
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_order_lock_ttl_secs() -> u64 {
    10
}
fn default_id_prefix() -> String {
    "order".into()
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            order_guard: OrderGuard::default(),
            order_lock_ttl_secs: default_order_lock_ttl_secs(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl SeckillConfig {
    pub fn order_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.order_lock_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "localdeals.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., LOCALDEALS__CACHE__REBUILD_WORKERS=20
        builder = builder.add_source(
            Environment::with_prefix("LOCALDEALS")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
