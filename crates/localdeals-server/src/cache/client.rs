//! The cache-aside client.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use localdeals_storage::{KvStore, StorageError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::logical::LogicalEntry;
use super::rebuild::RebuildPool;
use super::{CacheError, cache_key, lock_key};
use crate::config::CacheConfig;
use crate::lock::{DistributedLock, LockGuard};
use crate::metrics;

/// Outcome of reading a plain (non-logical) key.
enum Cached<T> {
    Value(T),
    Tombstone,
    Miss,
}

/// Tunables shared by every query strategy.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub null_ttl: Duration,
    pub lock_ttl: Duration,
    pub mutex_max_attempts: u32,
    pub retry_interval: Duration,
    pub max_backoff: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            null_ttl: config.null_ttl(),
            lock_ttl: config.lock_ttl(),
            mutex_max_attempts: config.mutex_max_attempts.max(1),
            retry_interval: config.retry_interval(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Generic cache-aside client.
///
/// Loaders are the backing-store lookups: `Ok(None)` means the entity does
/// not exist, `Err` is a store failure and is never cached.
#[derive(Clone)]
pub struct CacheClient {
    kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    rebuilds: RebuildPool,
    settings: Arc<CacheSettings>,
}

impl CacheClient {
    pub fn new(
        kv: Arc<dyn KvStore>,
        lock: DistributedLock,
        rebuilds: RebuildPool,
        settings: CacheSettings,
    ) -> Self {
        Self {
            kv,
            lock,
            rebuilds,
            settings: Arc::new(settings),
        }
    }

    pub fn rebuild_pool(&self) -> &RebuildPool {
        &self.rebuilds
    }

    /// Writes `value` as JSON with a physical TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.kv.set(key, &bytes, Some(ttl)).await?;
        Ok(())
    }

    /// Writes `value` inside a logical-expiry wrapper, with no physical TTL.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        logical_ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = encode_logical(value, logical_ttl)?;
        self.kv.set(key, &bytes, None).await?;
        Ok(())
    }

    /// Deletes a cached entry. Returns whether one existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.kv.delete(key).await?;
        debug!(key = %key, removed, "cache invalidated");
        Ok(removed)
    }

    /// Pass-through read with tombstones for absent IDs.
    pub async fn query_with_pass_through<T, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
    {
        const STRATEGY: &str = "pass_through";
        let key = cache_key(prefix, &id);

        match self.read_plain::<T>(&key, STRATEGY).await? {
            Cached::Value(value) => return Ok(Some(value)),
            Cached::Tombstone => return Ok(None),
            Cached::Miss => {}
        }

        let loaded = loader(id).await?;
        self.populate(&key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    /// Read where only the holder of `lock:{key}` rebuilds a missing entry.
    ///
    /// Callers that lose the race back off (doubling from `retry_interval`
    /// up to `max_backoff`) and re-read. After `mutex_max_attempts` failed
    /// acquisitions the call fails with [`CacheError::LockContention`].
    pub async fn query_with_mutex<T, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
    {
        const STRATEGY: &str = "mutex";
        let key = cache_key(prefix, &id);
        let lock_key = lock_key(&key);
        let attempts = self.settings.mutex_max_attempts;
        let mut backoff = self.settings.retry_interval;

        for attempt in 1..=attempts {
            match self.read_plain::<T>(&key, STRATEGY).await? {
                Cached::Value(value) => return Ok(Some(value)),
                Cached::Tombstone => return Ok(None),
                Cached::Miss => {}
            }

            if let Some(guard) = self.lock.try_lock(&lock_key, self.settings.lock_ttl).await? {
                // Whoever held the lock before us may have filled the entry.
                let result = match self.read_plain::<T>(&key, STRATEGY).await {
                    Ok(Cached::Value(value)) => Ok(Some(value)),
                    Ok(Cached::Tombstone) => Ok(None),
                    Ok(Cached::Miss) => self.load_and_populate(&key, id, loader, ttl).await,
                    Err(e) => Err(e),
                };
                release_quietly(guard, &lock_key).await;
                return result;
            }

            if attempt < attempts {
                debug!(key = %key, attempt, backoff_ms = backoff.as_millis() as u64, "rebuild lock busy, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.settings.max_backoff);
            }
        }

        warn!(key = %lock_key, attempts, "giving up on contended rebuild lock");
        Err(CacheError::LockContention {
            key: lock_key,
            attempts,
        })
    }

    /// Logical-expiry read. Never blocks on a rebuild.
    ///
    /// A total miss returns `None` without consulting the loader; keys are
    /// expected to be warmed with [`CacheClient::set_with_logical_expire`].
    /// A stale hit is returned as-is while at most one background task, run
    /// on the rebuild pool under `lock:{key}`, refreshes the entry. A caller
    /// that wins the lock after another rebuild finished gets the refreshed
    /// entry and submits nothing. When the pool is saturated the refresh is
    /// skipped.
    pub async fn query_with_logical_expire<T, ID, F, Fut>(
        &self,
        prefix: &str,
        id: ID,
        loader: F,
        logical_ttl: Duration,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        ID: Display + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, StorageError>> + Send + 'static,
    {
        const STRATEGY: &str = "logical_expire";
        let key = cache_key(prefix, &id);

        let Some(bytes) = self.kv.get(&key).await? else {
            metrics::record_cache_miss(STRATEGY);
            return Ok(None);
        };
        if bytes.is_empty() {
            metrics::record_tombstone_hit();
            return Ok(None);
        }
        let entry: LogicalEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.discard_corrupt(&key, &e).await;
                metrics::record_cache_miss(STRATEGY);
                return Ok(None);
            }
        };

        metrics::record_cache_hit(STRATEGY);
        if !entry.is_expired_at(OffsetDateTime::now_utc()) {
            return Ok(Some(entry.data));
        }

        let lock_key = lock_key(&key);
        let Some(guard) = self.lock.try_lock(&lock_key, self.settings.lock_ttl).await? else {
            return Ok(Some(entry.data));
        };

        // A rebuild may have completed between our read and the acquisition.
        let current = match self.kv.get(&key).await {
            Ok(current) => current,
            Err(e) => {
                release_quietly(guard, &lock_key).await;
                return Err(e.into());
            }
        };
        match current.as_deref().map(serde_json::from_slice::<LogicalEntry<T>>) {
            None => {
                debug!(key = %key, "logical entry dropped by a finished rebuild");
                release_quietly(guard, &lock_key).await;
                return Ok(None);
            }
            Some(Ok(fresh)) if !fresh.is_expired_at(OffsetDateTime::now_utc()) => {
                debug!(key = %key, "logical entry already rebuilt");
                release_quietly(guard, &lock_key).await;
                return Ok(Some(fresh.data));
            }
            Some(_) => {}
        }

        let Some(slot) = self.rebuilds.try_reserve() else {
            warn!(key = %key, "rebuild pool saturated, serving stale entry");
            release_quietly(guard, &lock_key).await;
            return Ok(Some(entry.data));
        };

        let client = self.clone();
        slot.spawn(async move {
            match loader(id).await {
                Ok(Some(fresh)) => {
                    let written = match encode_logical(&fresh, logical_ttl) {
                        Ok(bytes) => client.kv.set(&key, &bytes, None).await.map_err(CacheError::from),
                        Err(e) => Err(CacheError::from(e)),
                    };
                    match written {
                        Ok(()) => {
                            metrics::record_rebuild("completed");
                            debug!(key = %key, "logical entry rebuilt");
                        }
                        Err(e) => {
                            metrics::record_rebuild("failed");
                            warn!(key = %key, error = %e, "failed to write rebuilt entry");
                        }
                    }
                }
                Ok(None) => {
                    metrics::record_rebuild("completed");
                    debug!(key = %key, "entity gone from store, dropping logical entry");
                    if let Err(e) = client.kv.delete(&key).await {
                        warn!(key = %key, error = %e, "failed to drop logical entry");
                    }
                }
                Err(e) => {
                    metrics::record_rebuild("failed");
                    warn!(key = %key, error = %e, "logical rebuild loader failed");
                }
            }
            release_quietly(guard, &lock_key).await;
        });

        Ok(Some(entry.data))
    }

    async fn read_plain<T: DeserializeOwned>(
        &self,
        key: &str,
        strategy: &'static str,
    ) -> Result<Cached<T>, CacheError> {
        let Some(bytes) = self.kv.get(key).await? else {
            debug!(key = %key, "cache miss");
            metrics::record_cache_miss(strategy);
            return Ok(Cached::Miss);
        };
        if bytes.is_empty() {
            debug!(key = %key, "cache tombstone hit");
            metrics::record_tombstone_hit();
            return Ok(Cached::Tombstone);
        }
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                metrics::record_cache_hit(strategy);
                Ok(Cached::Value(value))
            }
            Err(e) => {
                self.discard_corrupt(key, &e).await;
                metrics::record_cache_miss(strategy);
                Ok(Cached::Miss)
            }
        }
    }

    async fn load_and_populate<T, ID, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
    {
        let loaded = loader(id).await?;
        self.populate(key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    /// Caches a loaded value, or a tombstone for `None`.
    async fn populate<T: Serialize>(
        &self,
        key: &str,
        value: Option<&T>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match value {
            Some(value) => self.set(key, value, ttl).await,
            None => {
                self.kv.set(key, &[], Some(self.settings.null_ttl)).await?;
                debug!(key = %key, "cached tombstone");
                Ok(())
            }
        }
    }

    async fn discard_corrupt(&self, key: &str, err: &serde_json::Error) {
        warn!(key = %key, error = %err, "discarding undecodable cache entry");
        if let Err(e) = self.kv.delete(key).await {
            warn!(key = %key, error = %e, "failed to delete undecodable cache entry");
        }
    }
}

async fn release_quietly(guard: LockGuard, lock_key: &str) {
    if let Err(e) = guard.release().await {
        warn!(key = %lock_key, error = %e, "failed to release rebuild lock");
    }
}

fn encode_logical<T: Serialize>(value: &T, logical_ttl: Duration) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&LogicalEntry::new(value, OffsetDateTime::now_utc() + logical_ttl))
}
