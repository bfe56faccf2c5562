use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore, TryAcquireError};
use tracing::{debug, error, info, Instrument, Span};

use crate::error::WorkerError;

/// A finished job as reported back by the pool.
#[derive(Debug)]
pub struct Completed<R> {
    pub label: String,
    /// `Err(JobPanicked)` when the job panicked; its slot is released either way.
    pub output: Result<R, WorkerError>,
}

/// At most `max_workers` jobs run at once.
///
/// Admission never queues: `submit` keeps trying for a free slot, sleeping
/// `admission_retry` between attempts, and returns once the job is running.
/// `dispatch` runs that same loop on its own task so the caller is never held up.
pub struct WorkerPool<R> {
    permits: Arc<Semaphore>,
    max_workers: usize,
    admission_retry: Duration,
    result_sender: mpsc::UnboundedSender<Completed<R>>,
    result_receiver: Mutex<mpsc::UnboundedReceiver<Completed<R>>>,
    shutdown: AtomicBool,
    /// Dispatched jobs still waiting for a slot.
    waiting: AtomicUsize,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// `max_workers` of zero is treated as one.
    pub fn new(max_workers: usize, admission_retry: Duration) -> Self {
        let max_workers = max_workers.max(1);
        let (result_sender, result_receiver) = mpsc::unbounded_channel();
        info!(max_workers, "Worker pool ready");
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            admission_retry,
            result_sender,
            result_receiver: Mutex::new(result_receiver),
            shutdown: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Jobs currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Dispatched jobs not yet admitted.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Hands `job` to a background admission loop and returns immediately.
    ///
    /// A job refused at admission (the pool shut down first) is reported on the result
    /// channel as `Err(ShuttingDown)`.
    pub fn dispatch<F>(self: &Arc<Self>, label: impl Into<String>, job: F)
    where
        F: Future<Output = R> + Send + 'static,
    {
        let pool = Arc::clone(self);
        let label = label.into();
        self.waiting.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(
            async move {
                let admitted = pool.submit(label.clone(), job).await;
                pool.waiting.fetch_sub(1, Ordering::SeqCst);
                if let Err(e) = admitted {
                    error!(job = %label, error = %e, "Job was not admitted");
                    if pool
                        .result_sender
                        .send(Completed {
                            label,
                            output: Err(e),
                        })
                        .is_err()
                    {
                        debug!("Result receiver dropped");
                    }
                }
            }
            .instrument(Span::current()),
        );
    }

    /// Waits for a free slot, then starts `job` on its own task.
    pub async fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<(), WorkerError>
    where
        F: Future<Output = R> + Send + 'static,
    {
        let label = label.into();
        let permit = loop {
            if self.is_shutdown() {
                return Err(WorkerError::ShuttingDown);
            }
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => break permit,
                Err(TryAcquireError::NoPermits) => {
                    debug!(job = %label, active = self.active(), "Worker pool full, retrying admission");
                    tokio::time::sleep(self.admission_retry).await;
                }
                Err(TryAcquireError::Closed) => return Err(WorkerError::ShuttingDown),
            }
        };

        debug!(job = %label, active = self.active(), "Job admitted");
        let sender = self.result_sender.clone();
        let span = tracing::info_span!("worker", job = %label);

        tokio::spawn(
            async move {
                // The inner task is the isolation boundary: a panic ends it, not this task.
                let output = match tokio::spawn(job).await {
                    Ok(result) => Ok(result),
                    Err(e) if e.is_panic() => {
                        error!("Job panicked; slot released");
                        Err(WorkerError::JobPanicked(label.clone()))
                    }
                    Err(e) => {
                        error!(error = %e, "Job was cancelled");
                        Err(WorkerError::JobPanicked(label.clone()))
                    }
                };
                drop(permit);
                if sender.send(Completed { label, output }).is_err() {
                    debug!("Result receiver dropped");
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Next finished job. Pends until one completes.
    pub async fn recv_result(&self) -> Option<Completed<R>> {
        self.result_receiver.lock().await.recv().await
    }

    pub fn try_recv_result(&self) -> Option<Completed<R>> {
        self.result_receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Refuses further submissions. Running jobs are left alone.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Resolves once no job holds a slot and no dispatched job is waiting for one.
    pub async fn wait_idle(&self) {
        let Ok(n) = u32::try_from(self.max_workers) else {
            return;
        };
        loop {
            while self.waiting() > 0 {
                tokio::time::sleep(self.admission_retry).await;
            }
            match self.permits.acquire_many(n).await {
                // A job admitted earlier holds its slot until done, so an empty waiting
                // count while every permit is held here means the pool is idle.
                Ok(_all) if self.waiting() == 0 => {
                    info!("All workers have stopped");
                    return;
                }
                Ok(_all) => continue,
                Err(_) => {
                    debug!("Worker pool semaphore closed");
                    return;
                }
            }
        }
    }
}
