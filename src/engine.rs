//! The big-job round loop.
//!
//! Each round asks the generation collaborator for a raw batch, filters it
//! down to fresh candidates and runs them through the [`ConceptLearner`] with
//! bounded concurrency. Outcomes are folded serially into one commit per
//! round, so counters and the error log are never lost to a race.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use tracing::{debug, info, warn};

use crate::concept::{normalize_key, split_candidates};
use crate::config::EngineConfig;
use crate::error::{AppResult, ErrorKind};
use crate::learner::{ConceptLearner, LearnOutcome};
use crate::provider::{ChainError, FallbackChain, Prompt};
use crate::registry::JobRegistry;
use crate::state_machine::{ErrorDescriptor, Job, JobStatus, JobView};
use crate::store::within;

/// Supplies raw candidate tokens for a round.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn generate(&self, count: usize) -> Result<Vec<String>, ChainError>;
}

/// Asks the `generation` chain for a comma separated word list.
pub struct ChainCandidateSource {
    chain: FallbackChain,
}

impl ChainCandidateSource {
    pub fn new(chain: FallbackChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl CandidateSource for ChainCandidateSource {
    async fn generate(&self, count: usize) -> Result<Vec<String>, ChainError> {
        let prompt = Prompt::new(format!(
            "Generate approximately {count} unique words or short phrases, separated by commas."
        ))
        .with_system(format!(
            "You are a generator. Produce an unordered list of approximately {count} unique \
             English words or short phrases (1-3 words each) spanning science, history, \
             technology, arts and everyday life. No numbering, no commentary."
        ))
        .with_max_tokens(u32::try_from(count.saturating_mul(4)).unwrap_or(u32::MAX).min(8192));

        let generation = self.chain.generate(&prompt).await?;
        Ok(split_candidates(&generation.text))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub raw_batch_size: usize,
    pub round_cap: usize,
    pub fan_out: usize,
    pub call_timeout: Duration,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            raw_batch_size: config.raw_batch_size,
            round_cap: config.round_cap,
            fan_out: config.fan_out,
            call_timeout: config.call_timeout(),
        }
    }
}

/// A normalized key with the surface form it was generated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Default)]
struct RoundTally {
    learned: u64,
    known: usize,
    not_started: usize,
    errors: Vec<ErrorDescriptor>,
}

/// Progress as the elapsed fraction of the job's time budget, held below 100
/// until the job actually completes.
pub fn time_progress(created_at: DateTime<Utc>, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    let Some(deadline) = deadline else {
        return 0;
    };
    let total = (deadline - created_at).num_milliseconds();
    if total <= 0 {
        return 99;
    }
    let elapsed = (now - created_at).num_milliseconds().max(0);
    (elapsed.saturating_mul(100) / total).clamp(0, 99) as u8
}

pub struct RoundEngine {
    registry: Arc<JobRegistry>,
    learner: Arc<ConceptLearner>,
    source: Arc<dyn CandidateSource>,
    settings: EngineSettings,
}

impl RoundEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        learner: Arc<ConceptLearner>,
        source: Arc<dyn CandidateSource>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            learner,
            source,
            settings,
        }
    }

    /// Runs a queued big job to a terminal state and returns the final snapshot.
    ///
    /// Returns an error only when a job snapshot could not be committed; in
    /// that case the job has been marked failed on a best-effort basis.
    pub async fn run(&self, job_id: &str) -> AppResult<JobView> {
        let job = self.registry.load(job_id).await?;
        let started = match self
            .registry
            .commit(job_id, |j| j.status = JobStatus::Running)
            .await
        {
            Ok(view) => view,
            Err(e) => return Err(self.registry.mark_failed(job_id, e).await),
        };
        info!(job_id, deadline = ?job.deadline, "big job started");

        let mut attempted: HashSet<String> = HashSet::new();
        let mut round = started.last_round;
        let mut rounds_run = 0u32;

        loop {
            if job.deadline_passed(Utc::now()) {
                info!(job_id, round, "deadline reached");
                break;
            }
            round += 1;

            let raw = match self.source.generate(self.settings.raw_batch_size).await {
                Ok(raw) => raw,
                Err(e) if rounds_run == 0 => {
                    warn!(job_id, error = %e, "concept generation unavailable before first round");
                    let d = ErrorDescriptor::new(
                        ErrorKind::Setup,
                        format!("concept generation unavailable: {e}"),
                    )
                    .in_round(round);
                    return self.finish(job_id, JobStatus::Failed, vec![d]).await;
                }
                Err(e) => {
                    warn!(job_id, round, error = %e, "concept generation failed, ending job");
                    let d = ErrorDescriptor::new(ErrorKind::Generation, e.to_string()).in_round(round);
                    return self.finish(job_id, JobStatus::Completed, vec![d]).await;
                }
            };

            let (accepted, mut errors) = self.select(&raw, &attempted, round).await;
            if accepted.is_empty() {
                info!(job_id, round, raw = raw.len(), "candidate supply exhausted");
                return self.finish(job_id, JobStatus::Completed, errors).await;
            }
            debug!(job_id, round, raw = raw.len(), accepted = accepted.len(), "round started");
            attempted.extend(accepted.iter().map(|c| c.key.clone()));

            let tally = self.process(&job, round, accepted).await;
            info!(
                job_id,
                round,
                learned = tally.learned,
                known = tally.known,
                failed = tally.errors.len(),
                not_started = tally.not_started,
                "round finished"
            );
            errors.extend(tally.errors);
            rounds_run += 1;

            let progress = time_progress(job.created_at, job.deadline, Utc::now());
            let learned = tally.learned;
            let committed = self
                .registry
                .commit(job_id, move |j| {
                    j.last_round = round;
                    j.total_tokens += learned;
                    j.progress = progress;
                    j.errors.extend(errors);
                })
                .await;
            if let Err(e) = committed {
                return Err(self.registry.mark_failed(job_id, e).await);
            }
        }

        self.finish(job_id, JobStatus::Completed, Vec::new()).await
    }

    /// Normalizes the raw batch and keeps up to `round_cap` keys that are new to
    /// this batch, this job and the processed set.
    async fn select(
        &self,
        raw: &[String],
        attempted: &HashSet<String>,
        round: u32,
    ) -> (Vec<Candidate>, Vec<ErrorDescriptor>) {
        let knowledge = self.learner.knowledge();
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        let mut errors = Vec::new();

        for token in raw {
            if accepted.len() >= self.settings.round_cap {
                break;
            }
            let Some(key) = normalize_key(token) else {
                continue;
            };
            if attempted.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }
            match within(self.settings.call_timeout, knowledge.is_processed(&key)).await {
                Ok(true) => {}
                Ok(false) => accepted.push(Candidate {
                    key,
                    label: token.trim().to_string(),
                }),
                Err(e) => errors.push(
                    ErrorDescriptor::new(ErrorKind::Persistence, e.to_string())
                        .in_round(round)
                        .for_concept(key),
                ),
            }
        }
        (accepted, errors)
    }

    async fn process(&self, job: &Job, round: u32, accepted: Vec<Candidate>) -> RoundTally {
        let learner = &self.learner;
        stream::iter(accepted)
            .map(|c| async move {
                // Candidates not started before the deadline stay unprocessed.
                if job.deadline_passed(Utc::now()) {
                    return None;
                }
                Some(learner.learn(&c.key, &c.label).await)
            })
            .buffer_unordered(self.settings.fan_out.max(1))
            .fold(RoundTally::default(), |mut tally, outcome| async move {
                match outcome {
                    Some(LearnOutcome::Learned(_)) => tally.learned += 1,
                    Some(LearnOutcome::AlreadyKnown) => tally.known += 1,
                    Some(LearnOutcome::Failed(d)) => tally.errors.push(d.in_round(round)),
                    None => tally.not_started += 1,
                }
                tally
            })
            .await
    }

    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        errors: Vec<ErrorDescriptor>,
    ) -> AppResult<JobView> {
        match self
            .registry
            .commit(job_id, move |j| {
                j.errors.extend(errors);
                j.status = status;
            })
            .await
        {
            Ok(view) => {
                info!(
                    job_id,
                    status = %view.status,
                    total_tokens = view.total_tokens,
                    rounds = view.last_round,
                    "big job finished"
                );
                Ok(view)
            }
            Err(e) => Err(self.registry.mark_failed(job_id, e).await),
        }
    }
}
