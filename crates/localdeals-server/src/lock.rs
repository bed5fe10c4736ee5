//! TTL-bounded distributed mutual exclusion over a [`KvStore`].
//!
//! Every acquisition writes a fresh random token as the lock value. Release
//! is a compare-and-delete on that token, so a holder whose lock already
//! expired and was taken by someone else cannot delete the new owner's key.

use std::sync::Arc;
use std::time::Duration;

use localdeals_storage::{KvStore, StorageError};
use uuid::Uuid;

use crate::metrics;

/// Lock service shared by the cache client and the purchase pipeline.
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Tries once to acquire `key` for `ttl`. Never waits.
    ///
    /// Returns `None` if another holder owns the key.
    pub async fn try_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, StorageError> {
        let token = Uuid::new_v4().to_string();
        if self.kv.set_if_absent(key, token.as_bytes(), ttl).await? {
            metrics::record_lock_acquired();
            tracing::debug!(key = %key, "lock acquired");
            Ok(Some(LockGuard {
                kv: Arc::clone(&self.kv),
                key: key.to_string(),
                token,
                released: false,
            }))
        } else {
            metrics::record_lock_contended();
            Ok(None)
        }
    }

    /// Releases `guard`. Returns `false` if the lock had already expired or
    /// been taken over.
    pub async fn unlock(&self, guard: LockGuard) -> Result<bool, StorageError> {
        guard.release().await
    }
}

/// Proof of a successful acquisition.
///
/// Dropping an unreleased guard schedules the compare-and-delete on the
/// current Tokio runtime; outside a runtime the key is left to its TTL.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    kv: Arc<dyn KvStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Compare-and-delete on this guard's token.
    pub async fn release(mut self) -> Result<bool, StorageError> {
        self.released = true;
        let owned = self
            .kv
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await?;
        if !owned {
            tracing::warn!(key = %self.key, "lock expired before release");
        }
        Ok(owned)
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.key, "lock guard dropped outside a runtime; waiting for TTL");
            return;
        };
        let kv = Arc::clone(&self.kv);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = kv.delete_if_equals(&key, token.as_bytes()).await {
                tracing::warn!(key = %key, error = %e, "background lock release failed");
            }
        });
    }
}
