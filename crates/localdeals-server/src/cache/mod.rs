//! Cache-aside client with three consistency strategies.
//!
//! ## Strategies
//!
//! - **Pass-through**: caches "confirmed absent" as an empty tombstone with a
//!   short TTL so repeated lookups for missing IDs stop hitting the store
//! - **Mutex**: on a miss only the lock holder rebuilds; everyone else backs
//!   off and re-reads
//! - **Logical expiry**: entries never expire physically; stale reads are
//!   served immediately while one background task refreshes the entry
//!
//! ## Key Layout
//!
//! ```text
//! {prefix}{id}        cached value, tombstone or logical wrapper
//! lock:{prefix}{id}   rebuild lock for that entry
//! ```
//!
//! A key prefix is used with exactly one strategy family: plain values
//! (pass-through, mutex) or logical wrappers (logical expiry).

pub mod client;
pub mod logical;
pub mod rebuild;

use localdeals_storage::StorageError;
use thiserror::Error;

pub use client::{CacheClient, CacheSettings};
pub use logical::LogicalEntry;
pub use rebuild::{RebuildPool, RebuildSlot};

#[derive(Debug, Error)]
pub enum CacheError {
    /// Key-value store or loader failure. Never cached.
    #[error("cache store error: {0}")]
    Store(#[from] StorageError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The rebuild lock stayed busy for every retry.
    #[error("lock {key} still contended after {attempts} attempts")]
    LockContention { key: String, attempts: u32 },
}

/// Cache key for `prefix` and `id`.
pub fn cache_key(prefix: &str, id: impl std::fmt::Display) -> String {
    format!("{prefix}{id}")
}

/// Rebuild lock key guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}
