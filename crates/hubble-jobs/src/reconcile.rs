//! Periodic sweep that re-queues chunks still waiting for an embedding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use hubble_core::defaults::RECONCILE_INTERVAL;
use hubble_core::{ChunkEmbeddingJob, ChunkRepository, Job, JobSink, Result};

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ReconcileCron {
    chunks: Arc<dyn ChunkRepository>,
    sink: Arc<dyn JobSink>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl ReconcileCron {
    pub fn new(chunks: Arc<dyn ChunkRepository>, sink: Arc<dyn JobSink>) -> Self {
        Self {
            chunks,
            sink,
            interval: RECONCILE_INTERVAL,
            running: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One sweep. Chunks already in `queued` are skipped; newly queued ids
    /// are added to it. Returns how many jobs were queued.
    pub async fn sweep(&self, queued: &mut HashSet<i32>) -> Result<usize> {
        let mut jobs = Vec::new();
        for chunk in self.chunks.find_unindexed_chunks().await? {
            if queued.insert(chunk.id) {
                jobs.push(Job::ChunkEmbedding(ChunkEmbeddingJob {
                    id: chunk.id,
                    content: chunk.content,
                }));
            }
        }
        let count = jobs.len();
        if count > 0 {
            self.sink.add_many(jobs).await?;
        }
        Ok(count)
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            return;
        }

        let (stop, mut stopped) = oneshot::channel();
        let cron = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cron.interval);
            let mut queued = HashSet::new();
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        match cron.sweep(&mut queued).await {
                            Ok(count) => info!(
                                subsystem = "jobs",
                                component = "reconcile",
                                queued = count,
                                "Reconcile sweep finished"
                            ),
                            Err(e) => error!(
                                subsystem = "jobs",
                                component = "reconcile",
                                error = %e,
                                "Reconcile sweep failed"
                            ),
                        }
                    }
                }
            }
        });

        *running = Some(Running { stop, handle });
        info!(
            subsystem = "jobs",
            component = "reconcile",
            interval_secs = self.interval.as_secs(),
            "Reconcile cron started"
        );
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(Running { stop, handle }) = running {
            let _ = stop.send(());
            if let Err(e) = handle.await {
                error!(
                    subsystem = "jobs",
                    component = "reconcile",
                    error = %e,
                    "Reconcile task ended abnormally"
                );
            }
            info!(subsystem = "jobs", component = "reconcile", "Reconcile cron stopped");
        }
    }
}
