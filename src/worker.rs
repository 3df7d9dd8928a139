//! Work queue and the pool of workers that drain it.
//!
//! Each job id is delivered to exactly one worker, which owns the job until it
//! reaches a terminal state.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::orchestrator::JobOrchestrator;
use crate::registry::JobRegistry;
use crate::state_machine::{JobMode, JobView};

/// Sending half of the shared work queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl JobQueue {
    pub fn enqueue(&self, job_id: &str) -> AppResult<()> {
        self.tx
            .send(job_id.to_string())
            .map_err(|_| AppError::Setup("worker pool is not running".into()))
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers sharing one queue.
    pub fn start(count: usize, orchestrator: Arc<JobOrchestrator>) -> (JobQueue, WorkerPool) {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..count.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job_id) = next else {
                            break;
                        };
                        info!(worker, job_id = %job_id, "job picked up");
                        match orchestrator.run_job(&job_id).await {
                            Ok(view) => info!(
                                worker,
                                job_id = %job_id,
                                status = %view.status,
                                total_tokens = view.total_tokens,
                                "job done"
                            ),
                            Err(e) => error!(worker, job_id = %job_id, error = %e, "job aborted"),
                        }
                    }
                })
            })
            .collect();

        (JobQueue { tx }, WorkerPool { handles })
    }

    /// Waits for every worker to exit. Workers stop once all queue handles are dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }
    }
}

/// Creates a job and hands it to the worker pool.
#[derive(Clone)]
pub struct JobSubmitter {
    registry: Arc<JobRegistry>,
    queue: JobQueue,
}

impl JobSubmitter {
    pub fn new(registry: Arc<JobRegistry>, queue: JobQueue) -> Self {
        Self { registry, queue }
    }

    pub async fn submit(&self, mode: JobMode) -> AppResult<JobView> {
        let view = self.registry.create(mode).await?;
        if let Err(e) = self.queue.enqueue(&view.id) {
            return Err(self.registry.mark_failed(&view.id, e).await);
        }
        Ok(view)
    }
}
