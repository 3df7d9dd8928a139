use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::RoundEngine;
use crate::error::{AppResult, ErrorKind};
use crate::learner::{ConceptLearner, LearnOutcome};
use crate::registry::JobRegistry;
use crate::state_machine::{ErrorDescriptor, JobMode, JobStatus, JobView};
use crate::store::within;

/// Drives a job to a terminal state according to its mode.
///
/// Big jobs go to the [`RoundEngine`]. Quick and deep jobs work through the
/// queue of unknown concepts with the same per-concept pipeline; deep jobs
/// then expand some known concepts.
pub struct JobOrchestrator {
    registry: Arc<JobRegistry>,
    learner: Arc<ConceptLearner>,
    engine: RoundEngine,
    quick_limit: usize,
    deepen_limit: usize,
    call_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        learner: Arc<ConceptLearner>,
        engine: RoundEngine,
        quick_limit: usize,
        deepen_limit: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            learner,
            engine,
            quick_limit,
            deepen_limit,
            call_timeout,
        }
    }

    /// Run a queued job to completion, returning its final snapshot.
    pub async fn run_job(&self, job_id: &str) -> AppResult<JobView> {
        let job = self.registry.load(job_id).await?;
        match job.mode {
            JobMode::Big => self.engine.run(job_id).await,
            JobMode::Quick => self.run_queue(job_id, Some(self.quick_limit), 0).await,
            JobMode::Deep => self.run_queue(job_id, None, self.deepen_limit).await,
        }
    }

    async fn run_queue(
        &self,
        job_id: &str,
        learn_limit: Option<usize>,
        deepen_limit: usize,
    ) -> AppResult<JobView> {
        if let Err(e) = self
            .registry
            .commit(job_id, |j| j.status = JobStatus::Running)
            .await
        {
            return Err(self.registry.mark_failed(job_id, e).await);
        }

        let knowledge = self.learner.knowledge();
        let to_learn = match within(self.call_timeout, knowledge.unknown()).await {
            Ok(mut unknown) => {
                if let Some(limit) = learn_limit {
                    unknown.truncate(limit);
                }
                unknown
            }
            Err(e) => {
                let d = ErrorDescriptor::new(
                    ErrorKind::Setup,
                    format!("knowledge store unavailable: {e}"),
                );
                return self.finish(job_id, JobStatus::Failed, vec![d]).await;
            }
        };

        let to_deepen = if deepen_limit > 0 {
            match within(self.call_timeout, knowledge.known(deepen_limit)).await {
                Ok(records) => records,
                Err(e) => {
                    let d = ErrorDescriptor::new(ErrorKind::Persistence, e.to_string());
                    self.commit_step(job_id, 0, 0, vec![d]).await?;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let total = to_learn.len() + to_deepen.len();
        info!(job_id, learn = to_learn.len(), deepen = to_deepen.len(), "queue job started");
        let mut done = 0;

        for key in &to_learn {
            let (learned, errors) = match self.learner.learn(key, key).await {
                LearnOutcome::Learned(_) => (1, Vec::new()),
                LearnOutcome::AlreadyKnown => (0, Vec::new()),
                LearnOutcome::Failed(d) => (0, vec![d]),
            };
            done += 1;
            self.commit_step(job_id, learned, step_progress(done, total), errors)
                .await?;
        }

        for record in to_deepen {
            let errors = match self.learner.deepen(record).await {
                Ok(_) => Vec::new(),
                Err(d) => vec![d],
            };
            done += 1;
            self.commit_step(job_id, 0, step_progress(done, total), errors)
                .await?;
        }

        self.finish(job_id, JobStatus::Completed, Vec::new()).await
    }

    async fn commit_step(
        &self,
        job_id: &str,
        learned: u64,
        progress: u8,
        errors: Vec<ErrorDescriptor>,
    ) -> AppResult<JobView> {
        match self
            .registry
            .commit(job_id, move |j| {
                j.total_tokens += learned;
                j.progress = progress;
                j.errors.extend(errors);
            })
            .await
        {
            Ok(view) => Ok(view),
            Err(e) => Err(self.registry.mark_failed(job_id, e).await),
        }
    }

    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        errors: Vec<ErrorDescriptor>,
    ) -> AppResult<JobView> {
        let committed = self
            .registry
            .commit(job_id, move |j| {
                j.errors.extend(errors);
                j.status = status;
            })
            .await;
        match committed {
            Ok(view) => {
                info!(job_id, status = %view.status, total_tokens = view.total_tokens, "queue job finished");
                Ok(view)
            }
            Err(e) => Err(self.registry.mark_failed(job_id, e).await),
        }
    }
}

/// Completed steps over planned steps, held below 100 until the job completes.
fn step_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(99) as u8
}


#[cfg(test)]
mod tests {
    use super::testing::{Harness, harness};
    use super::*;
    use crate::store::KnowledgeStore;
    use crate::store::tests_support::record;

    async fn queue(h: &Harness, keys: &[&str]) {
        for key in keys {
            h.knowledge.add_unknown(key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn quick_learns_up_to_limit() {
        let h = harness(3, 5);
        queue(&h, &["alpha", "beta", "gamma", "delta"]).await;
        let id = h.registry.create(JobMode::Quick).await.unwrap().id;

        let view = h.orch.run_job(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.total_tokens, 3);
        assert_eq!(view.progress, 100);
        assert_eq!(h.knowledge.unknown().await.unwrap(), vec!["delta"]);
        assert_eq!(h.deep.call_count(), 0);
    }

    #[tokio::test]
    async fn deep_learns_everything_then_deepens_known() {
        let h = harness(3, 2);
        h.knowledge.put(&record("gravity")).await.unwrap();
        queue(&h, &["alpha", "beta", "gamma", "delta"]).await;
        let id = h.registry.create(JobMode::Deep).await.unwrap().id;

        let view = h.orch.run_job(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.total_tokens, 4);
        assert!(h.knowledge.unknown().await.unwrap().is_empty());
        assert_eq!(h.deep.call_count(), 1);

        let gravity = h.knowledge.get("gravity").await.unwrap().unwrap();
        assert_eq!(gravity.expanded_definition.as_deref(), Some("expanded"));
    }

    #[tokio::test]
    async fn empty_queue_completes_immediately() {
        let h = harness(3, 0);
        let id = h.registry.create(JobMode::Quick).await.unwrap().id;
        let view = h.orch.run_job(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.total_tokens, 0);
    }

    #[tokio::test]
    async fn big_jobs_go_to_the_engine() {
        let h = harness(3, 0);
        let id = h.registry.create(JobMode::Big).await.unwrap().id;
        let view = h.orch.run_job(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.last_round, 0);
    }

    #[test]
    fn step_progress_stays_below_100() {
        assert_eq!(step_progress(0, 4), 0);
        assert_eq!(step_progress(2, 4), 50);
        assert_eq!(step_progress(4, 4), 99);
        assert_eq!(step_progress(1, 0), 0);
    }
}
