use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{JobStore, KnowledgeStore, StoreError};
use crate::concept::{Category, ConceptRecord};
use crate::state_machine::{Job, JobStatus};

#[derive(Default)]
struct Knowledge {
    records: BTreeMap<String, ConceptRecord>,
    processed: HashSet<String>,
    unknown: Vec<String>,
}

/// In-process store. Cheap to clone behind an `Arc`; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    knowledge: RwLock<Knowledge>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn queued(&self) -> Result<Vec<String>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut waiting: Vec<&Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        waiting.sort_by_key(|j| j.created_at);
        Ok(waiting.into_iter().map(|j| j.id.clone()).collect())
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<ConceptRecord>, StoreError> {
        Ok(self.knowledge.read().await.records.get(key).cloned())
    }

    async fn put(&self, record: &ConceptRecord) -> Result<(), StoreError> {
        let mut k = self.knowledge.write().await;
        k.unknown.retain(|u| u != &record.key);
        k.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn is_processed(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.knowledge.read().await.processed.contains(key))
    }

    async fn mark_processed(&self, key: &str) -> Result<(), StoreError> {
        self.knowledge.write().await.processed.insert(key.to_string());
        Ok(())
    }

    async fn add_unknown(&self, key: &str) -> Result<(), StoreError> {
        let mut k = self.knowledge.write().await;
        if !k.records.contains_key(key) && !k.unknown.iter().any(|u| u == key) {
            k.unknown.push(key.to_string());
        }
        Ok(())
    }

    async fn unknown(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.knowledge.read().await.unknown.clone())
    }

    async fn known(&self, limit: usize) -> Result<Vec<ConceptRecord>, StoreError> {
        Ok(self
            .knowledge
            .read()
            .await
            .records
            .values()
            .filter(|r| r.category != Category::Correction)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JobMode;
    use crate::store::tests_support::record;

    #[tokio::test]
    async fn jobs_roundtrip() {
        let store = MemoryStore::new();
        let job = Job::new(JobMode::Quick, std::time::Duration::from_secs(1));
        store.save(&job).await.unwrap();
        let loaded = store.load(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_removes_from_unknown() {
        let store = MemoryStore::new();
        store.add_unknown("entropy").await.unwrap();
        store.add_unknown("osmosis").await.unwrap();
        store.add_unknown("entropy").await.unwrap();
        assert_eq!(store.unknown().await.unwrap(), vec!["entropy", "osmosis"]);

        store.put(&record("entropy")).await.unwrap();
        assert_eq!(store.unknown().await.unwrap(), vec!["osmosis"]);
        assert!(store.get("entropy").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn known_concepts_are_not_queued() {
        let store = MemoryStore::new();
        store.put(&record("gravity")).await.unwrap();
        store.add_unknown("gravity").await.unwrap();
        assert!(store.unknown().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processed_set_membership() {
        let store = MemoryStore::new();
        assert!(!store.is_processed("a").await.unwrap());
        store.mark_processed("a").await.unwrap();
        store.mark_processed("a").await.unwrap();
        assert!(store.is_processed("a").await.unwrap());
    }

    #[tokio::test]
    async fn known_respects_limit_and_order() {
        let store = MemoryStore::new();
        for key in ["c", "a", "b"] {
            store.put(&record(key)).await.unwrap();
        }
        let keys: Vec<_> = store
            .known(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
