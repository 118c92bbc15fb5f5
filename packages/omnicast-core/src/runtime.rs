//! Task spawning abstraction and the bounded I/O worker pool.
//!
//! [`TaskSpawner`] lets the core spawn background work without owning a
//! runtime. [`IoWorkers`] layers a semaphore on top so resolves and
//! media-control requests never run unbounded.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};

/// Abstraction for spawning background tasks.
///
/// Allows core services to spawn asynchronous work without knowing the
/// underlying runtime. Implementations should ensure tasks can complete even
/// if the spawner is dropped.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    ///
    /// The spawner does not provide a way to cancel or join the spawned task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

/// Bounded-concurrency context for network I/O.
///
/// At most `limit` jobs run at once; the rest wait for a permit. Jobs are
/// independent: one finishing or failing never cancels another.
#[derive(Clone)]
pub struct IoWorkers {
    spawner: TokioSpawner,
    permits: Arc<Semaphore>,
}

impl IoWorkers {
    /// Creates a pool allowing `limit` concurrent jobs (minimum 1).
    #[must_use]
    pub fn new(spawner: TokioSpawner, limit: usize) -> Self {
        Self {
            spawner,
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Runs `job` on the pool and discards its output.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.spawner.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            job.await;
        });
    }

    /// Runs `job` on the pool and returns a receiver for its output.
    ///
    /// Dropping the receiver does not cancel the job.
    pub fn run<F, T>(&self, job: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn(async move {
            let _ = tx.send(job.await);
        });
        rx
    }

    /// Spawner for long-lived tasks that must not hold an I/O permit.
    pub fn spawner(&self) -> &TokioSpawner {
        &self.spawner
    }

    /// Number of jobs that could start right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
