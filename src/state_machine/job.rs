use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};

/// Which learning routine a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Learn a handful of queued unknown concepts.
    Quick,
    /// Learn every queued unknown concept, then deepen known ones.
    Deep,
    /// Time-boxed round loop over generated candidates.
    Big,
}

impl FromStr for JobMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(JobMode::Quick),
            "deep" => Ok(JobMode::Deep),
            "big" => Ok(JobMode::Big),
            other => Err(AppError::Validation(format!(
                "invalid job mode '{other}', expected quick, deep or big"
            ))),
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Quick => write!(f, "quick"),
            JobMode::Deep => write!(f, "deep"),
            JobMode::Big => write!(f, "big"),
        }
    }
}

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of a job's append-only error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            round: None,
            concept: None,
            kind,
            message: message.into(),
        }
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn for_concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = Some(concept.into());
        self
    }
}

/// A persisted knowledge-acquisition job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub mode: JobMode,
    pub status: JobStatus,
    pub progress: u8,
    pub total_tokens: u64,
    pub last_round: u32,
    #[serde(default)]
    pub errors: Vec<ErrorDescriptor>,
    pub created_at: DateTime<Utc>,
    /// Only big jobs carry a deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(mode: JobMode, horizon: Duration) -> Self {
        let now = Utc::now();
        let deadline = match mode {
            JobMode::Big => chrono::Duration::from_std(horizon)
                .ok()
                .and_then(|h| now.checked_add_signed(h)),
            _ => None,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            status: JobStatus::Queued,
            progress: 0,
            total_tokens: 0,
            last_round: 0,
            errors: Vec::new(),
            created_at: now,
            deadline,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stateless clock read against the job's deadline. Jobs without one never expire.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn view(&self) -> JobView {
        JobView::from(self)
    }
}

/// The snapshot shape returned by status queries and streamed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub id: String,
    pub status: JobStatus,
    pub mode: JobMode,
    pub progress: u8,
    pub total_tokens: u64,
    pub last_round: u32,
    pub created_at: DateTime<Utc>,
    pub errors: Vec<ErrorDescriptor>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            mode: job.mode,
            progress: job.progress,
            total_tokens: job.total_tokens,
            last_round: job.last_round,
            created_at: job.created_at,
            errors: job.errors.clone(),
        }
    }
}
