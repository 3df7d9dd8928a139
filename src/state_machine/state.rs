use chrono::Utc;

use super::job::{Job, JobStatus};

/// The result of checking a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status is unchanged.
    Stay,
    /// Advance to the given status.
    Next(JobStatus),
    /// The change is not allowed.
    Rejected { from: JobStatus, to: JobStatus },
}

/// Drives a `Job` through `queued → running → {completed, failed}`.
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition from `from` to `to`.
    ///
    /// - `Queued` may move to `Running`, or straight to `Failed` when the job
    ///   cannot even start.
    /// - `Running` may move to `Completed` or `Failed`.
    /// - Terminal states never transition again.
    pub fn check(from: JobStatus, to: JobStatus) -> Transition {
        if from == to {
            return Transition::Stay;
        }
        match (from, to) {
            (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed) => Transition::Next(to),
            (from, to) => Transition::Rejected { from, to },
        }
    }

    /// Apply a validated transition, stamping lifecycle timestamps.
    pub fn apply(job: &mut Job, to: JobStatus) -> Transition {
        let transition = Self::check(job.status, to);
        if let Transition::Next(next) = transition {
            let now = Utc::now();
            if next == JobStatus::Running {
                job.started_at = Some(now);
            }
            if next.is_terminal() {
                job.finished_at = Some(now);
                if next == JobStatus::Completed {
                    job.progress = 100;
                }
            }
            job.status = next;
        }
        transition
    }
}
