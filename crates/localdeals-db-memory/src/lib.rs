//! In-memory backends for localdeals.
//!
//! This crate provides single-process implementations of the collaborator
//! traits from `localdeals-storage`, built on DashMap for concurrent access:
//!
//! - [`InMemoryKvStore`]: Redis-like strings with per-key TTL
//! - [`InMemoryVoucherStore`]: vouchers and orders with a per-row atomic
//!   conditional decrement
//! - [`InMemoryShopStore`]: shop listings
//!
//! They back single-instance deployments, the Redis fallback path, and tests.
//!
//! # Example
//!
//! ```ignore
//! use localdeals_db_memory::InMemoryKvStore;
//! use localdeals_storage::KvStore;
//!
//! let kv = InMemoryKvStore::new();
//! assert!(kv.set_if_absent("lock:shop:1", b"token", Duration::from_secs(10)).await?);
//! ```

pub mod kv;
pub mod shop;
pub mod voucher;

pub use kv::InMemoryKvStore;
pub use shop::InMemoryShopStore;
pub use voucher::InMemoryVoucherStore;

// Re-export the contracts for convenience
pub use localdeals_storage::{KvStore, ShopStore, StorageError, VoucherStore};
