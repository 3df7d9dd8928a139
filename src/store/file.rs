use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{JobStore, KnowledgeStore, StoreError};
use crate::concept::{Category, ConceptRecord};
use crate::state_machine::{Job, JobStatus};

/// Directory-backed store shared by separate processes.
///
/// Layout: `jobs/<id>.json`, `knowledge/<encoded key>.json`, `processed.jsonl`
/// (one JSON string per line, append-only) and `unknown.json`.
pub struct FileStore {
    root: PathBuf,
    processed: Mutex<HashSet<String>>,
    unknown_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("jobs")).await?;
        fs::create_dir_all(root.join("knowledge")).await?;

        let processed = match fs::read_to_string(root.join("processed.jsonl")).await {
            Ok(contents) => contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str::<String>)
                .collect::<Result<HashSet<_>, _>>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(root = %root.display(), processed = processed.len(), "opened file store");

        Ok(Self {
            root,
            processed: Mutex::new(processed),
            unknown_lock: Mutex::new(()),
        })
    }

    fn job_path(&self, id: &str) -> Option<PathBuf> {
        let safe = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        safe.then(|| self.root.join("jobs").join(format!("{id}.json")))
    }

    fn knowledge_path(&self, key: &str) -> PathBuf {
        self.root
            .join("knowledge")
            .join(format!("{}.json", encode_key(key)))
    }

    fn unknown_path(&self) -> PathBuf {
        self.root.join("unknown.json")
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Readers in other processes must never observe a half-written document.
    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_unknown(&self) -> Result<Vec<String>, StoreError> {
        Ok(Self::read_json(&self.unknown_path()).await?.unwrap_or_default())
    }
}

/// Longest encoded key used verbatim as a file name.
const MAX_ENCODED_LEN: usize = 120;
/// Readable prefix kept in front of the digest for longer keys.
const HASHED_PREFIX_LEN: usize = 60;

/// File-name-safe encoding: ASCII alphanumerics pass through, everything else
/// becomes `%XX`. Long encodings keep a prefix and end in a SHA-256 digest of
/// the key, so names stay well under filesystem limits.
fn encode_key(key: &str) -> String {
    let encoded: String = key
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    if encoded.len() <= MAX_ENCODED_LEN {
        return encoded;
    }

    let mut cut = HASHED_PREFIX_LEN;
    // Never split a `%XX` escape.
    if let Some(pos) = encoded[..cut].rfind('%')
        && pos + 3 > cut
    {
        cut = pos;
    }
    format!("{}~{:x}", &encoded[..cut], Sha256::digest(key.as_bytes()))
}

#[async_trait]
impl JobStore for FileStore {
    async fn load(&self, id: &str) -> Result<Option<Job>, StoreError> {
        match self.job_path(id) {
            Some(path) => Self::read_json(&path).await,
            None => Ok(None),
        }
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let path = self
            .job_path(&job.id)
            .ok_or_else(|| StoreError::Unavailable(format!("unsafe job id '{}'", job.id)))?;
        Self::write_json(&path, job).await
    }

    async fn queued(&self) -> Result<Vec<String>, StoreError> {
        let mut waiting = Vec::new();
        let mut entries = fs::read_dir(self.root.join("jobs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            if let Some(job) = Self::read_json::<Job>(&path).await?
                && job.status == JobStatus::Queued
            {
                waiting.push((job.created_at, job.id));
            }
        }
        waiting.sort();
        Ok(waiting.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl KnowledgeStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<ConceptRecord>, StoreError> {
        Self::read_json(&self.knowledge_path(key)).await
    }

    async fn put(&self, record: &ConceptRecord) -> Result<(), StoreError> {
        Self::write_json(&self.knowledge_path(&record.key), record).await?;

        let _guard = self.unknown_lock.lock().await;
        let mut unknown = self.read_unknown().await?;
        let before = unknown.len();
        unknown.retain(|u| u != &record.key);
        if unknown.len() != before {
            Self::write_json(&self.unknown_path(), &unknown).await?;
        }
        Ok(())
    }

    async fn is_processed(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.processed.lock().await.contains(key))
    }

    async fn mark_processed(&self, key: &str) -> Result<(), StoreError> {
        let mut processed = self.processed.lock().await;
        if processed.contains(key) {
            return Ok(());
        }

        let mut line = serde_json::to_string(key)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("processed.jsonl"))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        processed.insert(key.to_string());
        Ok(())
    }

    async fn add_unknown(&self, key: &str) -> Result<(), StoreError> {
        if fs::try_exists(self.knowledge_path(key)).await? {
            return Ok(());
        }
        let _guard = self.unknown_lock.lock().await;
        let mut unknown = self.read_unknown().await?;
        if !unknown.iter().any(|u| u == key) {
            unknown.push(key.to_string());
            Self::write_json(&self.unknown_path(), &unknown).await?;
        }
        Ok(())
    }

    async fn unknown(&self) -> Result<Vec<String>, StoreError> {
        self.read_unknown().await
    }

    async fn known(&self, limit: usize) -> Result<Vec<ConceptRecord>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(self.root.join("knowledge")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            if records.len() >= limit {
                break;
            }
            if let Some(record) = Self::read_json::<ConceptRecord>(&path).await?
                && record.category != Category::Correction
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
