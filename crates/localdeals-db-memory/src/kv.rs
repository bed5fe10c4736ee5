//! In-memory key-value store with per-key TTL.
//!
//! Mirrors the subset of Redis string semantics the core relies on. Every
//! read-modify-write goes through the DashMap entry API, so it is atomic with
//! respect to other callers on the same key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use localdeals_storage::{KvStore, StorageError};

/// A stored value with an optional physical expiry.
#[derive(Clone, Debug)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Single-process [`KvStore`] backed by a DashMap.
///
/// Expired keys are dropped lazily on access; [`InMemoryKvStore::purge_expired`]
/// reclaims the rest.
#[derive(Clone, Debug, Default)]
pub struct InMemoryKvStore {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no keys are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes expired keys and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, value| {
            if value.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(removed, "purged expired in-memory keys");
        }
        removed
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Instant::now();
        if let Some(value) = self.entries.get(key) {
            if !value.is_expired(now) {
                return Ok(Some(value.data.clone()));
            }
            drop(value);
            self.entries.remove_if(key, |_, value| value.is_expired(now));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired(now)))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredValue::new(value.to_vec(), Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value.to_vec(), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, value| {
                !value.is_expired(now) && value.data.as_slice() == expected
            })
            .is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_expired(now) {
                    occupied.get_mut().expires_at = None;
                    0
                } else {
                    parse_counter(key, &occupied.get().data)?
                };
                let next = current.checked_add(1).ok_or_else(|| {
                    StorageError::internal(format!("increment would overflow counter {key}"))
                })?;
                occupied.get_mut().data = next.to_string().into_bytes();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(b"1".to_vec(), None));
                Ok(1)
            }
        }
    }
}

fn parse_counter(key: &str, data: &[u8]) -> Result<i64, StorageError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StorageError::internal(format!("value at {key} is not an integer")))
}
