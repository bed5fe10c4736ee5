//! Fixed-size executor for background cache rebuilds.
//!
//! At most `workers` rebuilds run at once. There is no queue: when every
//! worker is busy a new rebuild is refused and the caller keeps serving the
//! stale value.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

use crate::metrics;

#[derive(Clone, Debug)]
pub struct RebuildPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    workers: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Spawned rebuilds that have not finished yet.
    running: AtomicUsize,
    idle: Notify,
    submitted: AtomicU64,
    rejected: AtomicU64,
}

/// A reserved worker. Dropping it without spawning frees the worker.
#[derive(Debug)]
pub struct RebuildSlot {
    permit: OwnedSemaphorePermit,
    pool: RebuildPool,
}

impl RebuildSlot {
    /// Runs `task` on the reserved worker.
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { permit, pool } = self;
        pool.inner.submitted.fetch_add(1, Ordering::Relaxed);
        pool.inner.running.fetch_add(1, Ordering::AcqRel);
        metrics::record_rebuild("submitted");
        let inner = Arc::clone(&pool.inner);
        pool.inner.tracker.spawn(async move {
            metrics::set_active_rebuilds(inner.workers - inner.permits.available_permits());
            task.await;
            drop(permit);
            if inner.running.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }
}

impl RebuildPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                workers,
                permits: Arc::new(Semaphore::new(workers)),
                tracker: TaskTracker::new(),
                running: AtomicUsize::new(0),
                idle: Notify::new(),
                submitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Reserves a worker, or returns `None` when all are busy or the pool is
    /// shut down.
    pub fn try_reserve(&self) -> Option<RebuildSlot> {
        match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => Some(RebuildSlot {
                permit,
                pool: self.clone(),
            }),
            Err(_) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_rebuild("dropped");
                None
            }
        }
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Workers currently reserved or running.
    pub fn active(&self) -> usize {
        self.inner.workers - self.inner.permits.available_permits()
    }

    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    /// Waits until every spawned rebuild has finished. Reserved but unspawned
    /// slots are not waited for.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.running.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Refuses new work and waits for running rebuilds to finish.
    pub async fn shutdown(&self) {
        self.inner.permits.close();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        tracing::info!(
            submitted = self.submitted(),
            rejected = self.rejected(),
            "rebuild pool stopped"
        );
    }
}
