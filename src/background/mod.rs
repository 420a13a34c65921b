//! Background tasks — a bounded async job queue with retrying workers.
//!
//! [`TaskQueue`] owns the sending half of a bounded Tokio channel and a fixed
//! pool of worker tasks that share the receiving half. Each job is handed to a
//! [`JobHandler`]; failed attempts are retried with exponential backoff
//! according to a [`RetryPolicy`], and jobs that exhaust their attempts are
//! dead-lettered.
//!
//! ## Lifecycle
//!
//! - [`TaskQueue::start`] spawns the workers; it must run inside a Tokio runtime.
//! - [`TaskQueue::try_enqueue`] never waits: a full queue hands the job back.
//! - [`TaskQueue::shutdown`] closes the channel and waits for the workers to
//!   drain whatever was already queued. Dropping the queue closes the channel
//!   without waiting.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Boxed future returned by [`JobHandler::handle`].
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// Failure of a single job attempt.
#[derive(Debug, Error)]
pub enum JobError {
    /// Worth trying again after a backoff delay.
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help; the job is dead-lettered immediately.
    #[error("{0}")]
    Permanent(String),
}

/// Returned by [`TaskQueue::try_enqueue`] with the rejected job.
#[derive(Debug, Error)]
pub enum QueueError<J> {
    #[error("task queue is full")]
    Full(J),

    #[error("task queue is closed")]
    Closed(J),
}

impl<J> QueueError<J> {
    /// Recovers the job that could not be enqueued.
    pub fn into_job(self) -> J {
        match self {
            Self::Full(job) | Self::Closed(job) => job,
        }
    }
}

/// Final result of a job, reported to [`JobHandler::finished`].
#[derive(Debug)]
pub enum Outcome {
    Completed { attempts: u32 },
    DeadLettered { attempts: u32, error: JobError },
}

/// Processes jobs pulled off a [`TaskQueue`].
///
/// # Contract
///
/// - `handle` is called once per attempt and may be called again for the
///   same job after a failure.
/// - `finished` is called exactly once per job, after its last attempt.
/// - Implementations must be `Send + Sync`; one handler is shared by every worker.
pub trait JobHandler<J>: Send + Sync + 'static {
    fn handle(&self, job: &J) -> JobFuture;

    fn finished(&self, _job: J, _outcome: Outcome) {}
}

/// Exponential backoff between attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use freshcache::background::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 5,
    ///     base_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_millis(350),
    /// };
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(350));
    /// ```
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Shape of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub workers: usize,
    /// Channel capacity; enqueues beyond it are rejected.
    pub depth: usize,
    pub retry: RetryPolicy,
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// A bounded async job queue served by a fixed worker pool.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use freshcache::background::{JobFuture, JobHandler, QueueConfig, RetryPolicy, TaskQueue};
///
/// struct Print;
///
/// impl JobHandler<String> for Print {
///     fn handle(&self, job: &String) -> JobFuture {
///         let job = job.clone();
///         Box::pin(async move {
///             println!("{job}");
///             Ok(())
///         })
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let queue = TaskQueue::start(Print, QueueConfig {
///         workers: 2,
///         depth: 16,
///         retry: RetryPolicy::default(),
///     });
///     queue.try_enqueue("hello".to_string()).unwrap();
///     queue.shutdown().await;
/// }
/// ```
pub struct TaskQueue<J> {
    sender: mpsc::Sender<J>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl<J> TaskQueue<J>
where
    J: Send + Sync + 'static,
{
    /// Spawns `config.workers` workers feeding jobs to `handler`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, or if `config.depth` is zero.
    pub fn start<H>(handler: H, config: QueueConfig) -> Self
    where
        H: JobHandler<J>,
    {
        let (sender, receiver) = mpsc::channel(config.depth);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&handler),
                    Arc::clone(&counters),
                    config.retry,
                ))
            })
            .collect();

        info!(workers = config.workers, depth = config.depth, "task queue started");
        Self {
            sender,
            workers,
            counters,
        }
    }

    /// Enqueues a job without waiting for capacity.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] when the queue is at capacity and
    /// [`QueueError::Closed`] when every worker has exited.
    pub fn try_enqueue(&self, job: J) -> Result<(), QueueError<J>> {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => Err(QueueError::Full(job)),
            Err(mpsc::error::TrySendError::Closed(job)) => Err(QueueError::Closed(job)),
        }
    }

    /// Number of jobs waiting in the channel.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting jobs and waits for the workers to drain the queue.
    pub async fn shutdown(self) {
        let Self {
            sender, workers, ..
        } = self;
        drop(sender);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "task queue worker ended abnormally");
            }
        }
        info!("task queue stopped");
    }
}

async fn worker_loop<J, H>(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<J>>>,
    handler: Arc<H>,
    counters: Arc<Counters>,
    retry: RetryPolicy,
) where
    J: Send + Sync + 'static,
    H: JobHandler<J>,
{
    loop {
        // The receiver lock is released before the job runs.
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            debug!(worker = id, "task queue closed — worker exiting");
            break;
        };

        let outcome = run_with_retry(&*handler, &job, retry, &counters).await;
        match &outcome {
            Outcome::Completed { .. } => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::DeadLettered { attempts, error } => {
                counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, attempts, error = %error, "job dead-lettered");
            }
        }
        handler.finished(job, outcome);
    }
}

async fn run_with_retry<J, H>(
    handler: &H,
    job: &J,
    retry: RetryPolicy,
    counters: &Counters,
) -> Outcome
where
    H: JobHandler<J>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match handler.handle(job).await {
            Ok(()) => return Outcome::Completed { attempts: attempt },
            Err(error @ JobError::Permanent(_)) => {
                return Outcome::DeadLettered {
                    attempts: attempt,
                    error,
                };
            }
            Err(error) if attempt >= max_attempts => {
                return Outcome::DeadLettered {
                    attempts: attempt,
                    error,
                };
            }
            Err(error) => {
                let delay = retry.backoff(attempt);
                debug!(attempt, delay = ?delay, error = %error, "job attempt failed — retrying");
                counters.retried.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc::UnboundedSender;

    /// Fails the first `failures` attempts of every job, then succeeds.
    struct Flaky {
        failures: u32,
        permanent: bool,
        attempts: Arc<AtomicU32>,
        done: UnboundedSender<(u32, bool)>,
    }

    impl JobHandler<u32> for Flaky {
        fn handle(&self, _job: &u32) -> JobFuture {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let failures = self.failures;
            let permanent = self.permanent;
            Box::pin(async move {
                if n <= failures {
                    if permanent {
                        Err(JobError::Permanent("bad job".into()))
                    } else {
                        Err(JobError::Retryable("try later".into()))
                    }
                } else {
                    Ok(())
                }
            })
        }

        fn finished(&self, job: u32, outcome: Outcome) {
            let _ = self
                .done
                .send((job, matches!(outcome, Outcome::Completed { .. })));
        }
    }

    type Finished = mpsc::UnboundedReceiver<(u32, bool)>;

    fn queue(
        failures: u32,
        permanent: bool,
        max_attempts: u32,
    ) -> (TaskQueue<u32>, Arc<AtomicU32>, Finished) {
        let attempts = Arc::new(AtomicU32::new(0));
        let (done, rx) = mpsc::unbounded_channel();
        let handler = Flaky {
            failures,
            permanent,
            attempts: Arc::clone(&attempts),
            done,
        };
        let queue = TaskQueue::start(
            handler,
            QueueConfig {
                workers: 1,
                depth: 4,
                retry: RetryPolicy {
                    max_attempts,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(40),
                },
            },
        );
        (queue, attempts, rx)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(4), Duration::from_millis(400));
        assert_eq!(policy.backoff(6), Duration::from_secs(1));
        assert_eq!(policy.backoff(64), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (queue, attempts, mut done) = queue(2, false, 3);
        queue.try_enqueue(7).unwrap();
        assert_eq!(done.recv().await, Some((7, true)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dead_lettered, 0);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letters_after_max_attempts() {
        let (queue, attempts, mut done) = queue(u32::MAX, false, 2);
        queue.try_enqueue(1).unwrap();
        assert_eq!(done.recv().await, Some((1, false)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().dead_lettered, 1);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_skip_retries() {
        let (queue, attempts, mut done) = queue(u32::MAX, true, 5);
        queue.try_enqueue(1).unwrap();
        assert_eq!(done.recv().await, Some((1, false)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().retried, 0);
        queue.shutdown().await;
    }

    /// Never finishes, so the channel fills up behind it.
    struct Stuck;

    impl JobHandler<u32> for Stuck {
        fn handle(&self, _job: &u32) -> JobFuture {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn full_queue_returns_job() {
        let queue = TaskQueue::start(
            Stuck,
            QueueConfig {
                workers: 1,
                depth: 1,
                retry: RetryPolicy::default(),
            },
        );
        queue.try_enqueue(1).unwrap();
        // Let the worker take job 1 so the channel slot frees up.
        while queue.pending() > 0 {
            tokio::task::yield_now().await;
        }
        queue.try_enqueue(2).unwrap();
        let err = queue.try_enqueue(3).unwrap_err();
        assert!(matches!(err, QueueError::Full(3)));
        assert_eq!(err.into_job(), 3);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs() {
        let (queue, _attempts, mut done) = queue(0, false, 1);
        for job in 0..3 {
            queue.try_enqueue(job).unwrap();
        }
        queue.shutdown().await;
        let mut finished = Vec::new();
        while let Ok((job, ok)) = done.try_recv() {
            assert!(ok);
            finished.push(job);
        }
        assert_eq!(finished, vec![0, 1, 2]);
    }
}
