//! Bounded worker pool for sync cycles
//!
//! Every cycle runs as a tokio task that first takes a permit from a shared
//! semaphore, then runs under a hard deadline. A cycle that overruns is
//! dropped at its next await point; nothing else cancels it.
//!
//! ```text
//! trigger ──► spawn() ──► [wait for permit] ──► timeout(cycle) ──► log
//!                          (width = pool_size)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    width: usize,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(width: usize, task_timeout: Duration) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
            task_timeout,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Permits not currently held by a running task
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Run `task` on the pool.
    ///
    /// The returned handle resolves to the task's own result, or to
    /// `CycleTimeout` if it overran, or `PoolClosed` after [`close`].
    ///
    /// [`close`]: WorkerPool::close
    pub fn spawn<F, T>(&self, label: &'static str, task: F) -> JoinHandle<SyncResult<T>>
    where
        F: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let limit = self.task_timeout;
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SyncError::PoolClosed)?;
            debug!(task = label, "Worker started");

            match tokio::time::timeout(limit, task).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    debug!(task = label, error = %e, "Worker finished with error");
                    Err(e)
                }
                Err(_) => {
                    warn!(task = label, ?limit, "Worker overran its deadline, abandoning");
                    Err(SyncError::CycleTimeout(limit))
                }
            }
        })
    }

    /// Refuse new work. Tasks already holding a permit run to completion.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_spawn_returns_value() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        let result = pool.spawn("add", async { Ok(2 + 2) }).await.unwrap();
        assert_eq!(result.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_task_times_out() {
        let pool = WorkerPool::new(1, Duration::from_millis(100));
        let handle = pool.spawn("slow", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SyncError::CycleTimeout(_))));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_width_bounds_concurrency() {
        let pool = WorkerPool::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn("count", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1, Duration::from_secs(1));
        pool.close();
        let result = pool.spawn("late", async { Ok(()) }).await.unwrap();
        assert!(matches!(result, Err(SyncError::PoolClosed)));
    }

    #[test]
    fn test_zero_width_is_clamped() {
        assert_eq!(WorkerPool::new(0, Duration::from_secs(1)).width(), 1);
    }
}
