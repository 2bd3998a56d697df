//! Deadline-bounded worker pool for protocol operations
//!
//! Work is submitted as an owned future or blocking closure and runs on its
//! own task, never on the caller's. A semaphore bounds how many operations
//! run at once across all connections.
//!
//! Each submission gets a [`CancellationToken`] derived from the caller's
//! request token. When the deadline elapses (or the request is cancelled) the
//! caller gets an error at once, the token is cancelled, and the submission
//! gives up its worker slot. The work itself is not dropped: it observes the
//! token between protocol calls and unwinds through its own close path; its
//! late result is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};

/// Worker pool with a fixed per-operation deadline
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    workers: Arc<Semaphore>,
    deadline: Duration,
}

impl BoundedExecutor {
    /// Create a pool running at most `max_workers` operations at once
    pub fn new(max_workers: usize, deadline: Duration) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            deadline,
        }
    }

    /// Create a pool from `MAIL_GATEWAY_MAX_WORKERS` and the operation timeout
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_workers, config.operation_timeout())
    }

    /// Run an async protocol operation under the deadline
    ///
    /// `work` receives a token that is cancelled when the deadline elapses or
    /// `request` is cancelled; it should stop issuing protocol calls and close
    /// its connection once that happens. Waiting for a free worker counts
    /// against the deadline.
    ///
    /// # Errors
    ///
    /// - `Timeout` if the deadline elapses first
    /// - `Cancelled` if `request` is cancelled first
    /// - `Internal` if the work panics
    /// - any error the work itself returns
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        request: &CancellationToken,
        work: F,
    ) -> AppResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = request.child_token();
        let workers = Arc::clone(&self.workers);
        let work_token = token.clone();
        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = workers.acquire_owned() => permit
                    .map_err(|_| AppError::Internal("worker pool is closed".to_owned()))?,
                () = work_token.cancelled() => {
                    return Err(AppError::Cancelled(format!(
                        "{operation} abandoned before a worker was free"
                    )));
                }
            };

            let work = work(work_token.clone());
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => result,
                () = work_token.cancelled() => {
                    drop(permit);
                    work.await
                }
            }
        });
        self.supervise(operation, &token, handle).await
    }

    /// Run a blocking protocol call on the blocking thread pool under the deadline
    ///
    /// A blocking call cannot observe cancellation; once abandoned it still
    /// runs to completion, but without holding a worker slot.
    ///
    /// # Errors
    ///
    /// Same as [`BoundedExecutor::run`].
    pub async fn run_blocking<T, F>(
        &self,
        operation: &'static str,
        request: &CancellationToken,
        work: F,
    ) -> AppResult<T>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(operation, request, move |_| async move {
            tokio::task::spawn_blocking(work)
                .await
                .map_err(|e| AppError::Internal(format!("blocking worker failed: {e}")))?
        })
        .await
    }

    /// Await a submitted task until the deadline or cancellation
    ///
    /// On either, the submission's token is cancelled and the task detached.
    async fn supervise<T>(
        &self,
        operation: &'static str,
        token: &CancellationToken,
        handle: JoinHandle<AppResult<T>>,
    ) -> AppResult<T> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(operation, "request cancelled; abandoning in-flight operation");
                Err(AppError::Cancelled(format!("{operation} cancelled by the client")))
            }
            joined = timeout(self.deadline, handle) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(AppError::Internal(format!("{operation} worker failed: {e}"))),
                Err(_) => {
                    token.cancel();
                    warn!(
                        operation,
                        deadline_secs = self.deadline.as_secs_f64(),
                        "deadline elapsed; abandoning in-flight operation"
                    );
                    Err(AppError::Timeout(format!(
                        "{operation} exceeded {:?} deadline",
                        self.deadline
                    )))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::BoundedExecutor;
    use crate::errors::AppError;

    #[tokio::test]
    async fn returns_result_within_deadline() {
        let executor = BoundedExecutor::new(2, Duration::from_secs(5));
        let value = executor
            .run("search", &CancellationToken::new(), |_| async { Ok(7_usize) })
            .await
            .expect("must complete");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn propagates_work_error() {
        let executor = BoundedExecutor::new(2, Duration::from_secs(5));
        let err = executor
            .run::<(), _, _>("fetch", &CancellationToken::new(), |_| async {
                Err(AppError::Protocol("BAD".to_owned()))
            })
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Protocol(_)));
    }

    #[tokio::test]
    async fn times_out_but_close_path_still_runs() {
        let executor = BoundedExecutor::new(2, Duration::from_millis(50));
        let closed = Arc::new(AtomicBool::new(false));
        let closed_in_work = Arc::clone(&closed);

        let err = executor
            .run("search", &CancellationToken::new(), move |token| async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                closed_in_work.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .expect_err("must time out");
        assert!(err.is_timeout());
        assert!(!closed.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_message_keeps_subsecond_deadline() {
        let executor = BoundedExecutor::new(1, Duration::from_millis(100));
        let err = executor
            .run::<(), _, _>("search", &CancellationToken::new(), |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .await
            .expect_err("must time out");
        assert!(err.to_string().contains("exceeded 100ms deadline"));
    }

    #[tokio::test]
    async fn abandoned_loop_stops_and_frees_its_worker() {
        let executor = BoundedExecutor::new(1, Duration::from_millis(100));
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetches_in_work = Arc::clone(&fetches);

        let err = executor
            .run("search", &CancellationToken::new(), move |token| async move {
                for _ in 0..100 {
                    if token.is_cancelled() {
                        break;
                    }
                    fetches_in_work.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Ok(())
            })
            .await
            .expect_err("must time out");
        assert!(err.is_timeout());

        let other = executor
            .run("count", &CancellationToken::new(), |_| async { Ok("other session") })
            .await
            .expect("worker slot must be free again");
        assert_eq!(other, "other session");

        let at_timeout = fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fetches.load(Ordering::SeqCst) <= at_timeout + 1);
        assert!(at_timeout < 100);
    }

    #[tokio::test]
    async fn request_cancellation_reaches_the_work() {
        let executor = BoundedExecutor::new(1, Duration::from_secs(5));
        let request = CancellationToken::new();
        let observed = Arc::new(AtomicBool::new(false));
        let observed_in_work = Arc::clone(&observed);

        let canceller = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let err = executor
            .run("fetch", &request, move |token| async move {
                token.cancelled().await;
                observed_in_work.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .expect_err("must be cancelled");
        assert!(matches!(err, AppError::Cancelled(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn blocking_work_runs_and_times_out() {
        let executor = BoundedExecutor::new(2, Duration::from_millis(50));
        let value = executor
            .run_blocking("send", &CancellationToken::new(), || Ok("sent"))
            .await
            .expect("must complete");
        assert_eq!(value, "sent");

        let err = executor
            .run_blocking("send", &CancellationToken::new(), || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .expect_err("must time out");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn panicking_work_is_internal_error() {
        let executor = BoundedExecutor::new(1, Duration::from_secs(5));
        let err = executor
            .run_blocking::<(), _>("send", &CancellationToken::new(), || panic!("boom"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let executor = BoundedExecutor::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6)
            .map(|_| {
                let executor = executor.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    executor
                        .run("count", &CancellationToken::new(), move |_| async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.expect("task must join").expect("run must succeed");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
