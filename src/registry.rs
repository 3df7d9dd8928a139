//! Job creation, snapshots and guarded commits.
//!
//! Every write to a job goes through [`JobRegistry::commit`], which re-applies
//! the lifecycle invariants before persisting: counters never go down, errors
//! are only appended, and status changes must be accepted by the
//! [`StateMachine`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, ErrorKind};
use crate::state_machine::{
    ErrorDescriptor, Job, JobMode, JobStatus, JobView, StateMachine, Transition,
};
use crate::store::{JobStore, within};

pub struct JobRegistry {
    store: Arc<dyn JobStore>,
    horizon: Duration,
    call_timeout: Duration,
    commit_lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, horizon: Duration, call_timeout: Duration) -> Self {
        Self {
            store,
            horizon,
            call_timeout,
            commit_lock: Mutex::new(()),
        }
    }

    /// Persists a new queued job and returns its snapshot.
    pub async fn create(&self, mode: JobMode) -> AppResult<JobView> {
        let job = Job::new(mode, self.horizon);
        within(self.call_timeout, self.store.save(&job)).await?;
        info!(job_id = %job.id, %mode, "job created");
        Ok(job.view())
    }

    pub async fn snapshot(&self, id: &str) -> AppResult<JobView> {
        Ok(self.load(id).await?.view())
    }

    /// Jobs persisted as queued that no worker has picked up, oldest first.
    pub async fn queued(&self) -> AppResult<Vec<String>> {
        Ok(within(self.call_timeout, self.store.queued()).await?)
    }

    /// Full job record, including the deadline the engine needs.
    pub async fn load(&self, id: &str) -> AppResult<Job> {
        validate_id(id)?;
        within(self.call_timeout, self.store.load(id))
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Applies `mutation` to the stored job, enforces the invariants and persists.
    pub async fn commit<F>(&self, id: &str, mutation: F) -> AppResult<JobView>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let _guard = self.commit_lock.lock().await;
        let before = self.load(id).await?;
        if before.is_terminal() {
            return Err(AppError::Validation(format!(
                "job {id} is {} and cannot change",
                before.status
            )));
        }

        let mut next = before.clone();
        mutation(&mut next);
        let next = enforce(&before, next)?;

        within(self.call_timeout, self.store.save(&next)).await?;
        debug!(
            job_id = %id,
            status = %next.status,
            progress = next.progress,
            total_tokens = next.total_tokens,
            last_round = next.last_round,
            "job committed"
        );
        Ok(next.view())
    }

    /// Best-effort transition to `failed` after a commit error. Returns `cause`.
    pub async fn mark_failed(&self, id: &str, cause: AppError) -> AppError {
        warn!(job_id = %id, error = %cause, "job snapshot commit failed, marking job failed");
        let message = cause.to_string();
        let recorded = self
            .commit(id, move |j| {
                j.errors
                    .push(ErrorDescriptor::new(ErrorKind::Persistence, message));
                j.status = JobStatus::Failed;
            })
            .await;
        if let Err(e) = recorded {
            warn!(job_id = %id, error = %e, "could not record job failure");
        }
        cause
    }
}

fn validate_id(id: &str) -> AppResult<()> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| AppError::Validation(format!("'{id}' is not a valid job id")))
}

fn enforce(before: &Job, mut next: Job) -> AppResult<Job> {
    if !next.errors.starts_with(&before.errors) {
        return Err(AppError::Validation(
            "job errors can only be appended".into(),
        ));
    }

    next.id.clone_from(&before.id);
    next.mode = before.mode;
    next.created_at = before.created_at;
    next.deadline = before.deadline;

    next.progress = next.progress.min(100).max(before.progress);
    next.total_tokens = next.total_tokens.max(before.total_tokens);
    next.last_round = next.last_round.max(before.last_round);

    let requested = next.status;
    next.status = before.status;
    if let Transition::Rejected { from, to } = StateMachine::apply(&mut next, requested) {
        return Err(AppError::Validation(format!(
            "job cannot move from {from} to {to}"
        )));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> JobRegistry {
        JobRegistry::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(600),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn create_returns_queued_snapshot() {
        let reg = registry();
        let view = reg.create(JobMode::Big).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.progress, 0);

        let job = reg.load(&view.id).await.unwrap();
        assert!(job.deadline.is_some());
        assert_eq!(reg.snapshot(&view.id).await.unwrap(), view);
    }

    #[tokio::test]
    async fn snapshot_errors() {
        let reg = registry();
        assert!(matches!(
            reg.snapshot("not-a-uuid").await,
            Err(AppError::Validation(_))
        ));
        let unknown = Uuid::new_v4().to_string();
        assert!(matches!(
            reg.snapshot(&unknown).await,
            Err(AppError::NotFound(id)) if id == unknown
        ));
    }

    #[tokio::test]
    async fn counters_never_decrease() {
        let reg = registry();
        let id = reg.create(JobMode::Big).await.unwrap().id;
        reg.commit(&id, |j| {
            j.status = JobStatus::Running;
            j.progress = 40;
            j.total_tokens = 10;
            j.last_round = 2;
        })
        .await
        .unwrap();

        let view = reg
            .commit(&id, |j| {
                j.progress = 10;
                j.total_tokens = 3;
                j.last_round = 1;
            })
            .await
            .unwrap();
        assert_eq!(view.progress, 40);
        assert_eq!(view.total_tokens, 10);
        assert_eq!(view.last_round, 2);
    }

    #[tokio::test]
    async fn progress_is_capped_at_100() {
        let reg = registry();
        let id = reg.create(JobMode::Quick).await.unwrap().id;
        let view = reg
            .commit(&id, |j| {
                j.status = JobStatus::Running;
                j.progress = 250;
            })
            .await
            .unwrap();
        assert_eq!(view.progress, 100);
    }

    #[tokio::test]
    async fn errors_are_append_only() {
        let reg = registry();
        let id = reg.create(JobMode::Big).await.unwrap().id;
        reg.commit(&id, |j| {
            j.errors
                .push(ErrorDescriptor::new(ErrorKind::Research, "first"));
        })
        .await
        .unwrap();

        let err = reg.commit(&id, |j| j.errors.clear()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(reg.snapshot(&id).await.unwrap().errors.len(), 1);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_commits() {
        let reg = registry();
        let id = reg.create(JobMode::Big).await.unwrap().id;
        reg.commit(&id, |j| j.status = JobStatus::Running).await.unwrap();
        let done = reg
            .commit(&id, |j| j.status = JobStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.progress, 100);

        let err = reg
            .commit(&id, |j| j.status = JobStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(reg.snapshot(&id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let reg = registry();
        let id = reg.create(JobMode::Deep).await.unwrap().id;
        let err = reg
            .commit(&id, |j| j.status = JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("queued")));
    }

    #[tokio::test]
    async fn identity_fields_are_immutable() {
        let reg = registry();
        let view = reg.create(JobMode::Quick).await.unwrap();
        let after = reg
            .commit(&view.id, |j| j.mode = JobMode::Big)
            .await
            .unwrap();
        assert_eq!(after.mode, JobMode::Quick);
        assert_eq!(after.created_at, view.created_at);
    }
}
