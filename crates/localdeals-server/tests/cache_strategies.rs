//! Cache strategies over the in-memory key-value store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use localdeals_db_memory::InMemoryKvStore;
use localdeals_server::{CacheClient, CacheError, CacheSettings, DistributedLock, RebuildPool};
use localdeals_storage::{KvStore, StorageError};
use serde::{Deserialize, Serialize};

const PREFIX: &str = "cache:item:";
const TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: i64,
    name: String,
}

fn item(id: i64, name: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
    }
}

fn client_with(settings: CacheSettings, workers: usize) -> (CacheClient, Arc<dyn KvStore>) {
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let client = CacheClient::new(
        Arc::clone(&kv),
        DistributedLock::new(Arc::clone(&kv)),
        RebuildPool::new(workers),
        settings,
    );
    (client, kv)
}

fn client() -> (CacheClient, Arc<dyn KvStore>) {
    client_with(CacheSettings::default(), 10)
}

/// Store whose next `GET` stalls for `delay` after reading its value.
struct StallingKv {
    inner: InMemoryKvStore,
    stall_next_get: AtomicBool,
    delay: Duration,
}

impl StallingKv {
    fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryKvStore::new(),
            stall_next_get: AtomicBool::new(false),
            delay,
        }
    }
}

#[async_trait]
impl KvStore for StallingKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let value = self.inner.get(key).await?;
        if self.stall_next_get.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StorageError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StorageError> {
        self.inner.delete_if_equals(key, expected).await
    }

    async fn incr(&self, key: &str) -> Result<i64, StorageError> {
        self.inner.incr(key).await
    }
}

/// Loader that counts calls and answers with `value` after `delay`.
fn counting_loader(
    calls: &Arc<AtomicUsize>,
    value: Option<Item>,
    delay: Duration,
) -> impl FnOnce(i64) -> std::pin::Pin<Box<dyn Future<Output = Result<Option<Item>, StorageError>> + Send>>
+ Send
+ 'static {
    let calls = Arc::clone(calls);
    move |_id| {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }
}

// =============================================================================
// Pass-through
// =============================================================================

#[tokio::test]
async fn test_pass_through_caches_absence() {
    let (client, kv) = client();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let found = client
            .query_with_pass_through(PREFIX, 404, counting_loader(&calls, None, Duration::ZERO), TTL)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(kv.get("cache:item:404").await.unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn test_pass_through_reloads_after_tombstone_expires() {
    let settings = CacheSettings {
        null_ttl: Duration::from_millis(50),
        ..CacheSettings::default()
    };
    let (client, _) = client_with(settings, 1);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let found = client
            .query_with_pass_through(PREFIX, 405, counting_loader(&calls, None, Duration::ZERO), TTL)
            .await
            .unwrap();
        assert_eq!(found, None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let found = client
        .query_with_pass_through(
            PREFIX,
            405,
            counting_loader(&calls, Some(item(405, "restocked")), Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(found, Some(item(405, "restocked")));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pass_through_caches_value() {
    let (client, _) = client();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let found = client
            .query_with_pass_through(
                PREFIX,
                1,
                counting_loader(&calls, Some(item(1, "lamp")), Duration::ZERO),
                TTL,
            )
            .await
            .unwrap();
        assert_eq!(found, Some(item(1, "lamp")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pass_through_does_not_cache_loader_errors() {
    let (client, kv) = client();

    let err = client
        .query_with_pass_through(
            PREFIX,
            2,
            |_id: i64| async { Err::<Option<Item>, _>(StorageError::connection_error("db down")) },
            TTL,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store(ref e) if e.is_transient()));
    assert!(kv.get("cache:item:2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_undecodable_entry_is_treated_as_miss() {
    let (client, kv) = client();
    kv.set("cache:item:3", b"{not json", None).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let found = client
        .query_with_pass_through(
            PREFIX,
            3,
            counting_loader(&calls, Some(item(3, "chair")), Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(found, Some(item(3, "chair")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Mutex
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mutex_cold_cache_loads_once() {
    let (client, _) = client();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let loader = counting_loader(&calls, Some(item(9, "hot")), Duration::from_millis(100));
        handles.push(tokio::spawn(async move {
            client.query_with_mutex(PREFIX, 9, loader, TTL).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(item(9, "hot")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mutex_gives_up_with_lock_contention() {
    let settings = CacheSettings {
        mutex_max_attempts: 3,
        retry_interval: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
        ..CacheSettings::default()
    };
    let (client, kv) = client_with(settings, 1);
    kv.set_if_absent("lock:cache:item:5", b"someone-else", Duration::from_secs(30))
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let err = client
        .query_with_mutex(PREFIX, 5, counting_loader(&calls, None, Duration::ZERO), TTL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CacheError::LockContention { ref key, attempts: 3 } if key == "lock:cache:item:5"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mutex_releases_lock_on_loader_error() {
    let (client, kv) = client();

    let result = client
        .query_with_mutex(
            PREFIX,
            6,
            |_id: i64| async { Err::<Option<Item>, _>(StorageError::internal("boom")) },
            TTL,
        )
        .await;
    assert!(result.is_err());
    assert!(kv.get("lock:cache:item:6").await.unwrap().is_none());
    assert!(kv.get("cache:item:6").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mutex_tombstone_is_absent() {
    let (client, _) = client();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let found = client
            .query_with_mutex(PREFIX, 7, counting_loader(&calls, None, Duration::ZERO), TTL)
            .await
            .unwrap();
        assert!(found.is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Logical expiry
// =============================================================================

#[tokio::test]
async fn test_logical_total_miss_skips_loader() {
    let (client, _) = client();
    let calls = Arc::new(AtomicUsize::new(0));

    let found = client
        .query_with_logical_expire(
            PREFIX,
            1,
            counting_loader(&calls, Some(item(1, "x")), Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert!(found.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_logical_fresh_hit_never_rebuilds() {
    let (client, _) = client();
    client
        .set_with_logical_expire("cache:item:1", &item(1, "fresh"), TTL)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let found = client
        .query_with_logical_expire(
            PREFIX,
            1,
            counting_loader(&calls, Some(item(1, "other")), Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(found, Some(item(1, "fresh")));
    assert_eq!(client.rebuild_pool().submitted(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_logical_stale_readers_trigger_one_rebuild() {
    let (client, kv) = client();
    client
        .set_with_logical_expire("cache:item:2", &item(2, "old"), Duration::ZERO)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let client = client.clone();
        let loader = counting_loader(&calls, Some(item(2, "new")), Duration::from_millis(300));
        handles.push(tokio::spawn(async move {
            client.query_with_logical_expire(PREFIX, 2, loader, TTL).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(item(2, "old")));
    }

    client.rebuild_pool().wait_idle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.rebuild_pool().submitted(), 1);
    assert!(kv.get("lock:cache:item:2").await.unwrap().is_none());

    let refreshed = client
        .query_with_logical_expire(
            PREFIX,
            2,
            counting_loader(&calls, None, Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(refreshed, Some(item(2, "new")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_logical_saturated_pool_serves_stale_and_frees_lock() {
    let (client, kv) = client_with(CacheSettings::default(), 1);
    client
        .set_with_logical_expire("cache:item:3", &item(3, "old"), Duration::ZERO)
        .await
        .unwrap();
    let busy = client.rebuild_pool().try_reserve().expect("free worker");
    let calls = Arc::new(AtomicUsize::new(0));

    let found = client
        .query_with_logical_expire(
            PREFIX,
            3,
            counting_loader(&calls, Some(item(3, "new")), Duration::ZERO),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(found, Some(item(3, "old")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.rebuild_pool().rejected(), 1);
    assert!(kv.get("lock:cache:item:3").await.unwrap().is_none());
    drop(busy);
}

#[tokio::test]
async fn test_logical_rebuild_failure_keeps_stale_value() {
    let (client, kv) = client();
    client
        .set_with_logical_expire("cache:item:4", &item(4, "old"), Duration::ZERO)
        .await
        .unwrap();

    let found = client
        .query_with_logical_expire(
            PREFIX,
            4,
            |_id: i64| async { Err::<Option<Item>, _>(StorageError::connection_error("db down")) },
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(found, Some(item(4, "old")));

    client.rebuild_pool().wait_idle().await;
    assert!(kv.get("lock:cache:item:4").await.unwrap().is_none());
    assert!(kv.get("cache:item:4").await.unwrap().is_some());
}

#[tokio::test]
async fn test_logical_rebuild_of_vanished_entity_drops_entry() {
    let (client, kv) = client();
    client
        .set_with_logical_expire("cache:item:5", &item(5, "old"), Duration::ZERO)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let found = client
        .query_with_logical_expire(PREFIX, 5, counting_loader(&calls, None, Duration::ZERO), TTL)
        .await
        .unwrap();
    assert_eq!(found, Some(item(5, "old")));

    client.rebuild_pool().wait_idle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(kv.get("cache:item:5").await.unwrap().is_none());
    assert!(kv.get("lock:cache:item:5").await.unwrap().is_none());

    let found = client
        .query_with_logical_expire(PREFIX, 5, counting_loader(&calls, None, Duration::ZERO), TTL)
        .await
        .unwrap();
    assert_eq!(found, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_late_lock_winner_sees_finished_rebuild() {
    let stalling = Arc::new(StallingKv::new(Duration::from_millis(200)));
    let kv: Arc<dyn KvStore> = stalling.clone();
    let client = CacheClient::new(
        Arc::clone(&kv),
        DistributedLock::new(Arc::clone(&kv)),
        RebuildPool::new(10),
        CacheSettings::default(),
    );
    client
        .set_with_logical_expire("cache:item:6", &item(6, "old"), Duration::ZERO)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    // The slow reader reads the stale entry, then stalls before locking.
    stalling.stall_next_get.store(true, Ordering::SeqCst);
    let slow = {
        let client = client.clone();
        let loader = counting_loader(&calls, Some(item(6, "new")), Duration::from_millis(50));
        tokio::spawn(async move { client.query_with_logical_expire(PREFIX, 6, loader, TTL).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast = client
        .query_with_logical_expire(
            PREFIX,
            6,
            counting_loader(&calls, Some(item(6, "new")), Duration::from_millis(50)),
            TTL,
        )
        .await
        .unwrap();
    assert_eq!(fast, Some(item(6, "old")));
    client.rebuild_pool().wait_idle().await;

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, Some(item(6, "new")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.rebuild_pool().submitted(), 1);
    assert!(kv.get("lock:cache:item:6").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_removes_entry() {
    let (client, kv) = client();
    client.set("cache:item:8", &item(8, "x"), TTL).await.unwrap();
    assert!(client.invalidate("cache:item:8").await.unwrap());
    assert!(!client.invalidate("cache:item:8").await.unwrap());
    assert!(kv.get("cache:item:8").await.unwrap().is_none());
}
