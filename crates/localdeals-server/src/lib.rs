//! Concurrency-control core of the localdeals backend.
//!
//! - [`cache`]: cache-aside client with pass-through, mutex and
//!   logical-expiry strategies
//! - [`lock`]: token-fenced distributed lock
//! - [`id_worker`]: time-ordered 64-bit IDs
//! - [`seckill`]: oversell-safe flash-sale orders
//! - [`shop`]: cached shop reads and updates
//! - [`bootstrap`]: wiring everything from [`AppConfig`]

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod id_worker;
pub mod kv;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod seckill;
pub mod shop;

pub use bootstrap::{AppState, BootstrapError};
pub use cache::{CacheClient, CacheError, CacheSettings, LogicalEntry, RebuildPool};
pub use config::{AppConfig, CacheConfig, CacheStrategy, OrderGuard, RedisConfig, SeckillConfig};
pub use id_worker::{IdError, IdWorker};
pub use kv::{RedisKvStore, create_kv_store};
pub use lock::{DistributedLock, LockGuard};
pub use observability::init_tracing;
pub use seckill::{PurchaseError, RejectReason, SeckillService};
pub use shop::{ShopError, ShopService};
