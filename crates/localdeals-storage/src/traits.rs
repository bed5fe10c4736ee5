//! Collaborator contracts for the concurrency-control core.
//!
//! The core never implements a key-value or relational store itself. It talks
//! to them through the traits in this module; backends live in separate crates.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{PlaceOrderOutcome, SeckillVoucher, Shop, VoucherOrder};

/// Minimal key-value contract, modelled on the Redis string commands.
///
/// Implementations must be thread-safe and every method must be atomic with
/// respect to concurrent callers on the same key.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`. Returns `None` when the key is absent or expired.
    ///
    /// An empty value is a legitimate payload and must be returned as
    /// `Some(vec![])`, not `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// `SET key value [PX ttl]`. `None` means the key never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>)
    -> Result<(), StorageError>;

    /// `DEL key`. Returns `true` if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// `SET key value NX PX ttl`. Returns `true` if the key was absent and is
    /// now set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// Deletes `key` only if its current value equals `expected`.
    ///
    /// Returns `true` if the key was removed.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError>;

    /// `INCR key`. A missing key starts at zero, so the first call returns 1.
    async fn incr(&self, key: &str) -> Result<i64, StorageError>;
}

/// Relational contract for flash-sale vouchers and their orders.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Loads a voucher by ID.
    async fn get_voucher(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>, StorageError>;

    /// Counts committed orders for a (user, voucher) pair.
    async fn count_orders(&self, user_id: i64, voucher_id: i64) -> Result<i64, StorageError>;

    /// Atomically decrements stock (only while `stock > 0`) and inserts the
    /// order (only if no order exists for the same user and voucher).
    ///
    /// Both effects commit together or not at all. Implementations must never
    /// read the stock and write it back in two steps.
    async fn place_order(&self, order: &VoucherOrder) -> Result<PlaceOrderOutcome, StorageError>;
}

/// Relational contract for shop listings.
#[async_trait]
pub trait ShopStore: Send + Sync {
    /// Loads a shop by ID.
    async fn get_shop(&self, id: i64) -> Result<Option<Shop>, StorageError>;

    /// Overwrites an existing shop.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no shop has this ID.
    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError>;
}
