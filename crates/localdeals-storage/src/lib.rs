//! # localdeals-storage
//!
//! Collaborator contracts for the localdeals concurrency-control core.
//!
//! This crate defines the traits and record types that backing stores must
//! provide. It does not contain any implementations; those live in
//! `localdeals-db-memory`, `localdeals-db-postgres` and the Redis adapter in
//! `localdeals-server`.
//!
//! ## Overview
//!
//! - [`KvStore`]: the Redis-shaped key-value contract (`GET`, `SET`, `DEL`,
//!   `SET NX`, compare-and-delete, `INCR`) used by the cache, the lock and the
//!   ID generator.
//! - [`VoucherStore`]: vouchers plus the atomic conditional
//!   decrement-and-insert used by the flash-sale pipeline.
//! - [`ShopStore`]: shop listings behind the cached read path.
//!
//! ## Example
//!
//! ```ignore
//! use localdeals_storage::{KvStore, StorageError};
//!
//! async fn bump(kv: &dyn KvStore) -> Result<i64, StorageError> {
//!     kv.incr("icr:order:2026:10:17").await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{KvStore, ShopStore, VoucherStore};
pub use types::{PlaceOrderOutcome, SeckillVoucher, Shop, UserContext, VoucherOrder};
