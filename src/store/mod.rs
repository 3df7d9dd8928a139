//! Persistence interfaces for jobs and knowledge.
//!
//! The job collection and the knowledge collection are the only state shared
//! between the worker, the registry and the streaming gateway. Two backends are
//! provided: [`MemoryStore`] for a single process and tests, and [`FileStore`]
//! for sharing state between separate processes through a directory.

mod file;
mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::concept::ConceptRecord;
use crate::state_machine::Job;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store operation timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted job collection keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn save(&self, job: &Job) -> Result<(), StoreError>;

    /// Ids of jobs still waiting for a worker, oldest first.
    async fn queued(&self) -> Result<Vec<String>, StoreError>;
}

/// Persisted knowledge collection keyed by normalized concept key, plus the
/// processed set and the queue of unknown concepts.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ConceptRecord>, StoreError>;

    /// Inserts or replaces a record. A stored concept is no longer unknown.
    async fn put(&self, record: &ConceptRecord) -> Result<(), StoreError>;

    async fn is_processed(&self, key: &str) -> Result<bool, StoreError>;

    /// Adds a key to the processed set. Membership is permanent.
    async fn mark_processed(&self, key: &str) -> Result<(), StoreError>;

    async fn add_unknown(&self, key: &str) -> Result<(), StoreError>;

    /// Unknown concepts in the order they were queued.
    async fn unknown(&self) -> Result<Vec<String>, StoreError>;

    /// Up to `limit` learned concepts, ordered by key. Corrections are not listed.
    async fn known(&self, limit: usize) -> Result<Vec<ConceptRecord>, StoreError>;
}

/// Runs a store call under a deadline so a stuck backend cannot stall a round.
pub async fn within<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout)?
}

#[cfg(test)]
pub(crate) mod tests_support {
    use chrono::Utc;

    use crate::concept::{Category, ConceptRecord, Enrichment, Provenance};

    pub(crate) fn record(key: &str) -> ConceptRecord {
        ConceptRecord {
            key: key.to_string(),
            label: key.to_string(),
            definition: format!("{key} defined"),
            category: Category::Factual,
            enrichment: Enrichment::default(),
            provenance: Provenance {
                synthesized_by: "test".into(),
                ..Default::default()
            },
            expanded_definition: None,
            last_deepened: None,
            learned_at: Utc::now(),
        }
    }
}
