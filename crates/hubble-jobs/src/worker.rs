//! Bounded worker pool with retry scheduling.
//!
//! Jobs travel over an unbounded channel to a dispatcher task that spawns one
//! task per job, limited by a semaphore of the pool width. A failed job that
//! asks for a retry is re-sent after its backoff unless the pool has closed
//! in the meantime.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hubble_core::{Error, Result};

use crate::handler::{JobHandler, JobResult, RetryPolicy};

struct Envelope<J> {
    job: J,
    /// Retries already spent on this job.
    attempt: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared<J: Send + Sync + 'static> {
    name: &'static str,
    width: usize,
    policy: RetryPolicy,
    handler: Arc<dyn JobHandler<J>>,
    closed: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<Envelope<J>>>>,
}

impl<J: Debug + Send + Sync + 'static> Shared<J> {
    fn send(&self, envelope: Envelope<J>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Job("queue closed".to_string()));
        }
        let tx = lock(&self.tx);
        let tx = tx
            .as_ref()
            .ok_or_else(|| Error::Job("queue closed".to_string()))?;
        tx.send(envelope)
            .map_err(|_| Error::Job("queue closed".to_string()))
    }

    async fn run(self: Arc<Self>, envelope: Envelope<J>) {
        let start = Instant::now();
        let kind = self.handler.kind();

        let outcome = tokio::time::timeout(self.policy.timeout, self.handler.execute(&envelope.job)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => JobResult::Retry(format!(
                "job exceeded timeout of {}s",
                self.policy.timeout.as_secs()
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success => {
                debug!(
                    subsystem = "jobs",
                    pool = self.name,
                    job_kind = kind,
                    job = ?envelope.job,
                    duration_ms,
                    "Job completed"
                );
            }
            JobResult::Failed(message) => {
                warn!(
                    subsystem = "jobs",
                    pool = self.name,
                    job_kind = kind,
                    job = ?envelope.job,
                    duration_ms,
                    error = %message,
                    "Job failed"
                );
            }
            JobResult::Retry(message) => {
                let next = envelope.attempt + 1;
                if next > self.policy.max_retries {
                    error!(
                        subsystem = "jobs",
                        pool = self.name,
                        job_kind = kind,
                        job = ?envelope.job,
                        attempts = next,
                        error = %message,
                        "Job dropped after exhausting retries"
                    );
                    return;
                }
                let delay = self.policy.backoff(next);
                warn!(
                    subsystem = "jobs",
                    pool = self.name,
                    job_kind = kind,
                    job = ?envelope.job,
                    attempt = next,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job will be retried"
                );
                self.schedule_retry(
                    Envelope {
                        job: envelope.job,
                        attempt: next,
                    },
                    delay,
                );
            }
        }
    }

    fn schedule_retry(self: Arc<Self>, envelope: Envelope<J>, delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = self.send(envelope) {
                info!(
                    subsystem = "jobs",
                    pool = self.name,
                    error = %e,
                    "Pending retry dropped"
                );
            }
        });
    }
}

/// A pool of workers for one job payload type.
pub struct WorkerPool<J: Send + Sync + 'static> {
    shared: Arc<Shared<J>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope<J>>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<J: Debug + Send + Sync + 'static> WorkerPool<J> {
    pub fn new(
        name: &'static str,
        width: usize,
        policy: RetryPolicy,
        handler: Arc<dyn JobHandler<J>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                name,
                width: width.max(1),
                policy,
                handler,
                closed: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
            rx: Mutex::new(Some(rx)),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn width(&self) -> usize {
        self.shared.width
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Queue a job. Jobs pushed before [`start`](Self::start) wait in the
    /// channel.
    pub fn push(&self, job: J) -> Result<()> {
        self.shared.send(Envelope { job, attempt: 0 })
    }

    /// Spawn the dispatcher. A second call is a no-op.
    pub fn start(&self) {
        let Some(mut rx) = lock(&self.rx).take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(shared.width));
            while let Some(envelope) = rx.recv().await {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let worker = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.run(envelope).await;
                });
            }
            // Channel closed and drained. Wait for in-flight jobs.
            let _ = semaphore.acquire_many(shared.width as u32).await;
        });
        *lock(&self.dispatcher) = Some(handle);

        info!(
            subsystem = "jobs",
            pool = self.shared.name,
            width = self.shared.width,
            "Worker pool started"
        );
    }

    /// Stop accepting jobs, run what is already queued, and wait up to
    /// `wait` for the workers to finish.
    pub async fn close(&self, wait: Duration) {
        self.shared.closed.store(true, Ordering::Release);
        drop(lock(&self.shared.tx).take());

        let dispatcher = lock(&self.dispatcher).take();
        let Some(mut dispatcher) = dispatcher else {
            // Never started: anything queued is discarded with the receiver.
            drop(lock(&self.rx).take());
            return;
        };

        match tokio::time::timeout(wait, &mut dispatcher).await {
            Ok(_) => info!(
                subsystem = "jobs",
                pool = self.shared.name,
                "Worker pool drained"
            ),
            Err(_) => {
                dispatcher.abort();
                warn!(
                    subsystem = "jobs",
                    pool = self.shared.name,
                    wait_ms = wait.as_millis() as u64,
                    "Worker pool did not drain in time"
                );
            }
        }
    }
}
