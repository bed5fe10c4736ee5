//! Record types owned by the relational store.
//!
//! The cache and lock layers never own these records; they only gate access
//! to them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A flash-sale voucher with a bounded stock and a purchase window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeckillVoucher {
    /// The voucher ID.
    pub voucher_id: i64,
    /// Units left; never negative.
    pub stock: i32,
    /// First instant at which purchases are accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub begin_time: OffsetDateTime,
    /// Last instant at which purchases are accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
}

impl SeckillVoucher {
    /// Creates a voucher record.
    #[must_use]
    pub fn new(
        voucher_id: i64,
        stock: i32,
        begin_time: OffsetDateTime,
        end_time: OffsetDateTime,
    ) -> Self {
        Self {
            voucher_id,
            stock,
            begin_time,
            end_time,
        }
    }

    /// Returns `true` if `now` precedes the purchase window.
    #[must_use]
    pub fn not_started_at(&self, now: OffsetDateTime) -> bool {
        now < self.begin_time
    }

    /// Returns `true` if `now` follows the purchase window.
    #[must_use]
    pub fn ended_at(&self, now: OffsetDateTime) -> bool {
        now > self.end_time
    }
}

/// A committed voucher order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    /// Globally unique order ID.
    pub id: i64,
    /// The purchased voucher.
    pub voucher_id: i64,
    /// The purchasing user.
    pub user_id: i64,
    /// When the order was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VoucherOrder {
    /// Creates an order stamped with the current time.
    #[must_use]
    pub fn new(id: i64, voucher_id: i64, user_id: i64) -> Self {
        Self {
            id,
            voucher_id,
            user_id,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Outcome of the atomic "decrement stock and insert order" operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOrderOutcome {
    /// Stock was decremented and the order row inserted together.
    Placed,
    /// No stock left at the time of the conditional decrement.
    SoldOut,
    /// An order for the same (user, voucher) pair already exists.
    Duplicate,
}

/// A shop listing, the canonical cached entity of the read path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    #[serde(default)]
    pub area: Option<String>,
    pub address: String,
    /// Average price in cents.
    pub avg_price: i64,
    /// Rating times ten (e.g. 47 means 4.7).
    pub score: i32,
    pub x: f64,
    pub y: f64,
}

/// Identity of the caller on whose behalf an operation runs.
///
/// Passed explicitly through every call that needs the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: i64,
    #[serde(default)]
    pub nick_name: Option<String>,
}

impl UserContext {
    /// Creates a context for the given user.
    #[must_use]
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            nick_name: None,
        }
    }

    /// Attaches a display name.
    #[must_use]
    pub fn with_nick_name(mut self, nick_name: impl Into<String>) -> Self {
        self.nick_name = Some(nick_name.into());
        self
    }
}
