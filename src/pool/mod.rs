//! Bounded-concurrency worker pool for I/O-bound tasks.
//!
//! A fixed set of workers consumes tasks cooperatively from a bounded
//! channel (capacity 2N, providing submission backpressure), emits results
//! on a results channel, and publishes best-effort progress updates that
//! are dropped silently when the progress consumer lags, so a slow display
//! loop can never stall the workers.
//!
//! # Lifecycle
//!
//! Start → [`WorkerPool::submit`]* → [`WorkerPool::close`] → workers drain
//! → results and progress channels close. [`WorkerPool::shutdown`] cancels
//! in-flight work first.
//!
//! Task states progress Pending → Processing → (Completed | Failed); no
//! other transition occurs.
//!
//! # Example
//!
//! ```no_run
//! use hapiq::pool::WorkerPool;
//!
//! # async fn example() {
//! let mut pool = WorkerPool::start(4, |n: u32| async move { Ok(n * 2) });
//! for n in 0..10 {
//!     pool.submit(n).await.ok();
//! }
//! pool.close();
//! let results = pool.collect().await;
//! assert_eq!(results.len(), 10);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Progress channel capacity. Updates beyond this are dropped, not queued.
const PROGRESS_BUFFER: usize = 64;

/// Observable state of a pool task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the task.
    Processing,
    /// The task finished successfully.
    Completed,
    /// The task finished with an error.
    Failed,
}

/// Best-effort progress notification.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Pool-assigned task id (submission order).
    pub task_id: usize,
    /// New state of the task.
    pub state: TaskState,
}

/// Outcome of one task.
#[derive(Debug)]
pub struct TaskOutcome<R> {
    /// Pool-assigned task id (submission order).
    pub task_id: usize,
    /// The handler's result; `Err` carries a display string.
    pub result: Result<R, String>,
}

/// Errors surfaced by pool operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// Submission after `close()` or after all workers exited.
    #[error("worker pool is closed")]
    Closed,
}

/// Cooperative cancellation signal shared across the pipeline.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a new, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Asserts the signal. All observers see it promptly.
    pub fn cancel(&self) {
        // Send only fails when every receiver is gone, which is harmless.
        let _ = self.tx.send(true);
    }

    /// Returns true when cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded-concurrency executor over I/O-bound tasks.
pub struct WorkerPool<T, R> {
    task_tx: Option<mpsc::Sender<(usize, T)>>,
    results_rx: mpsc::Receiver<TaskOutcome<R>>,
    progress_rx: mpsc::Receiver<ProgressUpdate>,
    cancel: CancelToken,
    next_id: AtomicUsize,
    workers: Vec<JoinHandle<()>>,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Starts a pool of `workers` workers executing `handler` per task.
    ///
    /// `workers` is clamped to a minimum of 1. The task channel is
    /// buffered at twice the worker count.
    #[must_use]
    pub fn start<F, Fut>(workers: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        Self::start_with_cancel(workers, handler, CancelToken::new())
    }

    /// Starts a pool wired to an externally owned cancellation token.
    #[must_use]
    pub fn start_with_cancel<F, Fut>(workers: usize, handler: F, cancel: CancelToken) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let workers = workers.max(1);
        let (task_tx, task_rx) = mpsc::channel::<(usize, T)>(workers * 2);
        let (results_tx, results_rx) = mpsc::channel::<TaskOutcome<R>>(workers * 2);
        let (progress_tx, progress_rx) = mpsc::channel::<ProgressUpdate>(PROGRESS_BUFFER);

        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let handler = Arc::new(handler);

        debug!(workers, "starting worker pool");

        let handles = (0..workers)
            .map(|worker_id| {
                let task_rx = Arc::clone(&task_rx);
                let handler = Arc::clone(&handler);
                let results_tx = results_tx.clone();
                let progress_tx = progress_tx.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            trace!(worker_id, "worker observed cancellation");
                            break;
                        }

                        let next = {
                            let mut rx = task_rx.lock().await;
                            tokio::select! {
                                task = rx.recv() => task,
                                () = cancel.cancelled() => None,
                            }
                        };
                        let Some((task_id, payload)) = next else {
                            break;
                        };

                        // Progress is best-effort: a full channel drops the
                        // update rather than blocking the worker.
                        let _ = progress_tx.try_send(ProgressUpdate {
                            task_id,
                            state: TaskState::Processing,
                        });

                        let result = handler(payload).await;
                        let state = if result.is_ok() {
                            TaskState::Completed
                        } else {
                            TaskState::Failed
                        };
                        let _ = progress_tx.try_send(ProgressUpdate { task_id, state });

                        if results_tx
                            .send(TaskOutcome { task_id, result })
                            .await
                            .is_err()
                        {
                            warn!(worker_id, "results receiver dropped, worker exiting");
                            break;
                        }
                    }
                })
            })
            .collect();

        Self {
            task_tx: Some(task_tx),
            results_rx,
            progress_rx,
            cancel,
            next_id: AtomicUsize::new(0),
            workers: handles,
        }
    }

    /// Submits a task, waiting when the bounded channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after `close()` or once all workers
    /// have exited.
    pub async fn submit(&self, task: T) -> Result<usize, PoolError> {
        let Some(tx) = &self.task_tx else {
            return Err(PoolError::Closed);
        };
        let task_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tx.send((task_id, task))
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(task_id)
    }

    /// Closes the task channel; workers drain remaining tasks and exit.
    pub fn close(&mut self) {
        self.task_tx = None;
    }

    /// Receives the next task outcome, or `None` once all workers finished.
    pub async fn next_result(&mut self) -> Option<TaskOutcome<R>> {
        self.results_rx.recv().await
    }

    /// Drains and returns the progress updates currently buffered.
    pub fn progress(&mut self) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.progress_rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Returns the shared cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Collects all remaining outcomes until the pool drains.
    ///
    /// The task channel must be closed first, otherwise this waits forever.
    pub async fn collect(mut self) -> Vec<TaskOutcome<R>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.results_rx.recv().await {
            outcomes.push(outcome);
        }
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        outcomes
    }

    /// Cancels in-flight work, closes the task channel, and waits for
    /// workers to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.close();
        self.results_rx.close();
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ==================== Lifecycle Tests ====================

    #[tokio::test]
    async fn test_pool_submits_and_collects_exactly_n_results() {
        let mut pool = WorkerPool::start(4, |n: u32| async move { Ok::<_, String>(n * 2) });
        for n in 0..20u32 {
            pool.submit(n).await.unwrap();
        }
        pool.close();

        let outcomes = pool.collect().await;
        assert_eq!(outcomes.len(), 20);
        let mut values: Vec<u32> = outcomes
            .into_iter()
            .map(|o| o.result.unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pool_submit_after_close_fails() {
        let mut pool = WorkerPool::start(1, |n: u32| async move { Ok::<_, String>(n) });
        pool.close();
        assert_eq!(pool.submit(1).await, Err(PoolError::Closed));
    }

    #[tokio::test]
    async fn test_pool_failed_tasks_reported_not_dropped() {
        let mut pool = WorkerPool::start(2, |n: u32| async move {
            if n % 2 == 0 {
                Ok(n)
            } else {
                Err(format!("task {n} failed"))
            }
        });
        for n in 0..6u32 {
            pool.submit(n).await.unwrap();
        }
        pool.close();

        let outcomes = pool.collect().await;
        assert_eq!(outcomes.len(), 6);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_err()).count(), 3);
    }

    #[tokio::test]
    async fn test_pool_single_worker_minimum() {
        // Zero workers is clamped to one; work still completes.
        let mut pool = WorkerPool::start(0, |n: u32| async move { Ok::<_, String>(n) });
        pool.submit(7).await.unwrap();
        pool.close();
        let outcomes = pool.collect().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &7);
    }

    // ==================== Cancellation Tests ====================

    #[tokio::test]
    async fn test_pool_cancellation_stops_dequeuing() {
        let cancel = CancelToken::new();
        let mut pool = WorkerPool::start_with_cancel(
            1,
            |_: u32| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(())
            },
            cancel.clone(),
        );
        for n in 0..2u32 {
            pool.submit(n).await.unwrap();
        }
        cancel.cancel();
        pool.close();

        let outcomes = pool.collect().await;
        // At most the in-flight task completes; queued work is abandoned.
        assert!(outcomes.len() <= 1, "got {} outcomes", outcomes.len());
    }

    #[tokio::test]
    async fn test_cancel_token_observed_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    // ==================== Progress Tests ====================

    #[tokio::test]
    async fn test_pool_progress_updates_best_effort() {
        let mut pool = WorkerPool::start(2, |n: u32| async move { Ok::<_, String>(n) });
        for n in 0..4u32 {
            pool.submit(n).await.unwrap();
        }
        pool.close();

        // Drain results first so all tasks ran, then inspect progress.
        while pool.next_result().await.is_some() {}
        let updates = pool.progress();
        assert!(
            updates
                .iter()
                .any(|u| u.state == TaskState::Completed),
            "expected completion updates, got {updates:?}"
        );
        assert!(updates.iter().all(|u| u.state != TaskState::Pending));
    }
}
