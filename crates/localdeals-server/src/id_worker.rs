//! Globally unique, time-ordered 64-bit IDs.
//!
//! Layout: the high 32 bits hold seconds since 2022-01-01T00:00:00Z, the low
//! 32 bits hold a per-prefix, per-UTC-day counter from `INCR`. IDs from one
//! caller are strictly increasing; IDs across instances sharing the same
//! key-value store are unique.

use std::sync::Arc;

use localdeals_storage::{KvStore, StorageError};
use thiserror::Error;
use time::OffsetDateTime;

use crate::metrics;

/// 2022-01-01T00:00:00Z.
pub const EPOCH_ANCHOR_SECS: i64 = 1_640_995_200;

const COUNT_BITS: u32 = 32;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("ID counter store error: {0}")]
    Store(#[from] StorageError),

    /// More than 2^32 - 1 IDs were requested for one prefix in one day.
    #[error("daily ID sequence exhausted for {key} (count {count})")]
    SequenceExhausted { key: String, count: i64 },

    #[error("system clock is before the ID epoch")]
    ClockBeforeEpoch,

    #[error("timestamp {seconds}s since the ID epoch does not fit in 31 bits")]
    TimestampOverflow { seconds: i64 },
}

/// Counter key for `prefix` on the UTC calendar day of `now`.
pub fn counter_key(prefix: &str, now: OffsetDateTime) -> String {
    format!(
        "icr:{prefix}:{:04}:{:02}:{:02}",
        now.year(),
        u8::from(now.month()),
        now.day()
    )
}

/// ID generator over a shared counter store.
#[derive(Clone)]
pub struct IdWorker {
    kv: Arc<dyn KvStore>,
}

impl IdWorker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn next_id(&self, prefix: &str) -> Result<i64, IdError> {
        self.next_id_at(prefix, OffsetDateTime::now_utc()).await
    }

    /// Generates an ID as of `now`. The counter key and the timestamp bits
    /// come from the same instant.
    pub async fn next_id_at(&self, prefix: &str, now: OffsetDateTime) -> Result<i64, IdError> {
        let now = now.to_offset(time::UtcOffset::UTC);
        let seconds = now.unix_timestamp() - EPOCH_ANCHOR_SECS;
        if seconds < 0 {
            return Err(IdError::ClockBeforeEpoch);
        }
        if seconds >= 1 << 31 {
            return Err(IdError::TimestampOverflow { seconds });
        }

        let key = counter_key(prefix, now);
        let count = self.kv.incr(&key).await?;
        if !(1..1 << COUNT_BITS).contains(&count) {
            return Err(IdError::SequenceExhausted { key, count });
        }

        metrics::record_id_issued(prefix);
        Ok((seconds << COUNT_BITS) | count)
    }
}
