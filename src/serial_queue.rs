//! Serial Queue (§4.L) — a single-slot, strict-FIFO job queue with
//! cooperative cancellation.
//!
//! No precedent for this exact shape exists in the code this crate
//! learns from; it is built from general `tokio::sync::{mpsc, oneshot}`
//! channel idioms rather than adapted from a specific file. "Single
//! slot" means at most one job may be queued ahead of the one currently
//! running — a second submission while the first is still waiting is
//! rejected rather than buffered, so the Evaluator never piles up stale
//! work behind a stuck execution job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{info, warn};

/// Cooperative cancellation handle passed into every job body. A job
/// must poll `is_cancelled()` at its own natural checkpoints; the queue
/// cannot forcibly interrupt work in flight.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Outcome of a submitted job, delivered to the submitter via a
/// [`JobHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;
type JobFn = Box<dyn FnOnce(CancelToken) -> JobFuture + Send>;

struct Job {
    run: JobFn,
    cancel_token: CancelToken,
    result_tx: oneshot::Sender<JobOutcome>,
}

/// A handle to a job submitted onto the queue; await it to learn the
/// outcome once the job runs.
pub struct JobHandle {
    result_rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub async fn wait(self) -> JobOutcome {
        self.result_rx.await.unwrap_or(JobOutcome::Cancelled)
    }
}

/// Returned by [`SerialQueue::submit`] when the single slot is already
/// occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBusy;

/// Single-slot strict-FIFO job runner with cooperative cancellation and
/// an idle signal for graceful shutdown.
pub struct SerialQueue {
    tx: mpsc::Sender<Job>,
    in_flight: Arc<AtomicBool>,
    idle_notify: Arc<Notify>,
    current_cancel: Arc<parking_lot::Mutex<Option<CancelToken>>>,
}

impl SerialQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let idle_notify = Arc::new(Notify::new());
        let current_cancel = Arc::new(parking_lot::Mutex::new(None));

        let in_flight_worker = in_flight.clone();
        let idle_notify_worker = idle_notify.clone();
        let current_cancel_worker = current_cancel.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                in_flight_worker.store(true, Ordering::SeqCst);
                *current_cancel_worker.lock() = Some(job.cancel_token.clone());

                let outcome = if job.cancel_token.is_cancelled() {
                    JobOutcome::Cancelled
                } else {
                    (job.run)(job.cancel_token.clone()).await
                };

                if let JobOutcome::Failed(ref reason) = outcome {
                    warn!(reason, "serial queue job failed");
                }

                let _ = job.result_tx.send(outcome);
                *current_cancel_worker.lock() = None;
                in_flight_worker.store(false, Ordering::SeqCst);
                idle_notify_worker.notify_waiters();
            }
        });

        Self { tx, in_flight, idle_notify, current_cancel }
    }

    /// Submit a job. Rejected with [`QueueBusy`] if a job is already
    /// queued or running — callers should treat this as "try again next
    /// tick", never as a reason to block.
    pub fn submit<F, Fut>(&self, job: F) -> Result<JobHandle, QueueBusy>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let cancel_token = CancelToken::new();
        let job = Job {
            run: Box::new(move |token| Box::pin(job(token))),
            cancel_token,
            result_tx,
        };

        self.tx.try_send(job).map_err(|_| QueueBusy)?;
        Ok(JobHandle { result_rx })
    }

    /// Signal cooperative cancellation to whatever job is currently
    /// running. Does not affect jobs submitted afterward.
    pub fn cancel_current(&self) {
        if let Some(token) = self.current_cancel.lock().as_ref() {
            token.cancel();
            info!("cancellation requested for in-flight serial queue job");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no job is running, or `timeout` elapses — used during
    /// graceful shutdown.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        if !self.is_busy() {
            return true;
        }
        tokio::time::timeout(timeout, self.idle_notify.notified()).await.is_ok() || !self.is_busy()
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_run_strictly_in_submission_order() {
        let queue = SerialQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let h1 = queue
            .submit(move |_| async move {
                o1.lock().push(1);
                JobOutcome::Completed
            })
            .unwrap();
        h1.wait().await;

        let o2 = order.clone();
        let h2 = queue
            .submit(move |_| async move {
                o2.lock().push(2);
                JobOutcome::Completed
            })
            .unwrap();
        h2.wait().await;

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn second_submission_while_busy_is_rejected() {
        let queue = SerialQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let _h1 = queue
            .submit(move |_| async move {
                let _ = release_rx.await;
                JobOutcome::Completed
            })
            .unwrap();

        tokio::task::yield_now().await;
        let second = queue.submit(|_| async { JobOutcome::Completed });
        assert!(second.is_err());

        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn cancel_current_is_observed_cooperatively() {
        let queue = SerialQueue::new();
        let handle = queue
            .submit(|token| async move {
                for _ in 0..50 {
                    if token.is_cancelled() {
                        return JobOutcome::Cancelled;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                JobOutcome::Completed
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.cancel_current();
        let outcome = handle.wait().await;
        assert_eq!(outcome, JobOutcome::Cancelled);
    }

    #[tokio::test]
    async fn wait_for_idle_returns_once_job_completes() {
        let queue = SerialQueue::new();
        let handle = queue.submit(|_| async { JobOutcome::Completed }).unwrap();
        let idle = queue.wait_for_idle(Duration::from_secs(1)).await;
        assert!(idle);
        handle.wait().await;
    }
}
