//! Redis-backed [`KvStore`] and backend selection.
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable at startup, [`create_kv_store`] falls
//! back to the single-process in-memory store. Locks and ID counters are then
//! only exclusive within this instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use localdeals_db_memory::InMemoryKvStore;
use localdeals_storage::{KvStore, StorageError};
use redis::{RedisError, Script};

use crate::config::RedisConfig;

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`KvStore`] over a deadpool-redis connection pool.
#[derive(Clone)]
pub struct RedisKvStore {
    pool: Pool,
    compare_and_delete: Arc<Script>,
}

impl std::fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisKvStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            compare_and_delete: Arc::new(Script::new(COMPARE_AND_DELETE)),
        }
    }

    async fn conn(&self) -> Result<Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::connection_error(format!("Redis pool error: {e}")))
    }
}

fn redis_error(err: RedisError) -> StorageError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        StorageError::connection_error(err.to_string())
    } else {
        StorageError::internal(format!("Redis error: {err}"))
    }
}

/// Milliseconds for `PX`, never zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        // OK => Some("OK"), already set => Nil
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let mut conn = self.conn().await?;
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)
    }
}

/// Builds the key-value backend from configuration.
///
/// - **Redis disabled**: in-memory store
/// - **Redis enabled**: connects, falling back to in-memory on failure
pub async fn create_kv_store(config: &RedisConfig) -> Arc<dyn KvStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory key-value store");
        return Arc::new(InMemoryKvStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    redis_config.pool = Some(deadpool_redis::PoolConfig {
        max_size: config.pool_size,
        timeouts: deadpool_redis::Timeouts {
            wait: timeout,
            create: timeout,
            recycle: timeout,
        },
        ..Default::default()
    });

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory store."
            );
            return Arc::new(InMemoryKvStore::new());
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Arc::new(RedisKvStore::new(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory store."
            );
            Arc::new(InMemoryKvStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn test_disabled_redis_uses_memory() {
        let kv = create_kv_store(&RedisConfig::default()).await;
        assert!(kv.set_if_absent("k", b"v", Duration::from_secs(1)).await.unwrap());
        assert!(!kv.set_if_absent("k", b"v", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".into(),
            timeout_ms: 200,
            ..Default::default()
        };
        let kv = create_kv_store(&config).await;
        assert_eq!(kv.incr("icr:test").await.unwrap(), 1);
    }
}
