//! Wires stores, providers and services together from an [`AppConfig`].

use std::sync::Arc;

use tracing::info;

use crate::api::AppState;
use crate::config::AppConfig;
use crate::engine::{ChainCandidateSource, EngineSettings, RoundEngine};
use crate::error::AppResult;
use crate::gateway::StatusGateway;
use crate::learner::ConceptLearner;
use crate::orchestrator::JobOrchestrator;
use crate::provider::{Chains, ProviderSet};
use crate::registry::JobRegistry;
use crate::research::MultiResearcher;
use crate::rethink::RethinkService;
use crate::store::{FileStore, KnowledgeStore};
use crate::worker::{JobSubmitter, WorkerPool};

pub struct App {
    pub config: AppConfig,
    pub registry: Arc<JobRegistry>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub gateway: StatusGateway,
    pub rethink: Arc<RethinkService>,
}

impl App {
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let call_timeout = config.engine.call_timeout();
        let store = Arc::new(FileStore::open(&config.storage.dir).await?);
        let knowledge: Arc<dyn KnowledgeStore> = store.clone();

        let providers = ProviderSet::from_config(&config.providers);
        let chains = Chains::build(&providers, &config.chains, call_timeout)?;
        let researcher = Arc::new(MultiResearcher::from_config(&config.research));

        let registry = Arc::new(JobRegistry::new(
            store,
            config.engine.horizon(),
            call_timeout,
        ));
        let learner = Arc::new(ConceptLearner::new(
            knowledge.clone(),
            researcher.clone(),
            &chains,
            call_timeout,
        ));
        let engine = RoundEngine::new(
            registry.clone(),
            learner.clone(),
            Arc::new(ChainCandidateSource::new(chains.generation.clone())),
            EngineSettings::from(&config.engine),
        );
        let orchestrator = Arc::new(JobOrchestrator::new(
            registry.clone(),
            learner,
            engine,
            config.engine.quick_limit,
            config.engine.deepen_limit,
            call_timeout,
        ));
        let gateway = StatusGateway::new(registry.clone(), config.gateway.poll_interval());
        let rethink = Arc::new(RethinkService::new(
            researcher,
            chains.rethink.clone(),
            knowledge.clone(),
            call_timeout,
        ));

        info!(storage = %config.storage.dir.display(), "services ready");
        Ok(Self {
            config,
            registry,
            knowledge,
            orchestrator,
            gateway,
            rethink,
        })
    }

    /// Starts the configured number of workers, hands them any jobs left
    /// queued by an earlier run, and returns the HTTP state.
    pub async fn start_workers(&self) -> AppResult<(AppState, WorkerPool)> {
        let (queue, pool) = WorkerPool::start(self.config.workers.count, self.orchestrator.clone());
        let pending = self.registry.queued().await?;
        for id in &pending {
            queue.enqueue(id)?;
        }
        if !pending.is_empty() {
            info!(jobs = pending.len(), "resumed queued jobs");
        }
        let state = AppState {
            registry: self.registry.clone(),
            submitter: JobSubmitter::new(self.registry.clone(), queue),
            gateway: self.gateway.clone(),
            rethink: self.rethink.clone(),
            knowledge: self.knowledge.clone(),
        };
        Ok((state, pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{JobMode, JobStatus};

    #[tokio::test]
    async fn builds_from_defaults_and_persists_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.dir = dir.path().to_path_buf();

        let app = App::build(config.clone()).await.unwrap();
        let id = app.registry.create(JobMode::Quick).await.unwrap().id;
        drop(app);

        let reopened = App::build(config).await.unwrap();
        let view = reopened.registry.snapshot(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.mode, JobMode::Quick);
    }

    #[tokio::test]
    async fn restart_resumes_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.dir = dir.path().to_path_buf();

        let id = {
            let app = App::build(config.clone()).await.unwrap();
            app.registry.create(JobMode::Quick).await.unwrap().id
        };

        let app = App::build(config).await.unwrap();
        let (_state, _pool) = app.start_workers().await.unwrap();

        let mut status = JobStatus::Queued;
        for _ in 0..200 {
            status = app.registry.snapshot(&id).await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        assert!(app.registry.queued().await.unwrap().is_empty());
    }
}
