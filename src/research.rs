//! Web research collaborators returning short text snippets for a query.
//!
//! An empty snippet list is a valid answer; callers continue without context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ResearchConfig;

const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";
const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const MAX_SNIPPETS: usize = 5;

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("research backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("research timed out")]
    Timeout,
}

#[async_trait]
pub trait Researcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>, ResearchError>;
}

/// The query the research phase issues for a concept.
pub fn concept_query(concept: &str) -> String {
    format!("what is {concept}")
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn backend_error(backend: &str, err: impl std::fmt::Display) -> ResearchError {
    ResearchError::Backend {
        backend: backend.to_string(),
        message: err.to_string(),
    }
}

pub struct GoogleCseResearcher {
    api_key: String,
    cx: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleCseResearcher {
    pub fn new(api_key: String, cx: String) -> Self {
        Self::with_base_url(api_key, cx, GOOGLE_CSE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, cx: String, base_url: String) -> Self {
        Self {
            api_key,
            cx,
            base_url,
            client: http_client(),
        }
    }
}

#[async_trait]
impl Researcher for GoogleCseResearcher {
    async fn search(&self, query: &str) -> Result<Vec<String>, ResearchError> {
        let num = MAX_SNIPPETS.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| backend_error("google", e))?
            .error_for_status()
            .map_err(|e| backend_error("google", e))?;

        let parsed: CseResponse = response
            .json()
            .await
            .map_err(|e| backend_error("google", e))?;

        Ok(parsed
            .items
            .into_iter()
            .map(|i| if i.snippet.is_empty() { i.title } else { i.snippet })
            .filter(|s| !s.trim().is_empty())
            .take(MAX_SNIPPETS)
            .collect())
    }
}

pub struct DuckDuckGoResearcher {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct DdgResponse {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<DdgTopic>,
}

#[derive(Debug, Deserialize)]
struct DdgTopic {
    #[serde(rename = "Text", default)]
    text: String,
}

impl DuckDuckGoResearcher {
    pub fn new() -> Self {
        Self::with_base_url(DUCKDUCKGO_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            base_url,
            client: http_client(),
        }
    }
}

impl Default for DuckDuckGoResearcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Researcher for DuckDuckGoResearcher {
    async fn search(&self, query: &str) -> Result<Vec<String>, ResearchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| backend_error("duckduckgo", e))?
            .error_for_status()
            .map_err(|e| backend_error("duckduckgo", e))?;

        // The instant answer API sometimes labels JSON as javascript.
        let body = response
            .text()
            .await
            .map_err(|e| backend_error("duckduckgo", e))?;
        let parsed: DdgResponse =
            serde_json::from_str(&body).map_err(|e| backend_error("duckduckgo", e))?;

        let mut snippets = Vec::new();
        if !parsed.abstract_text.trim().is_empty() {
            snippets.push(parsed.abstract_text);
        }
        snippets.extend(
            parsed
                .related_topics
                .into_iter()
                .map(|t| t.text)
                .filter(|t| !t.trim().is_empty()),
        );
        snippets.truncate(MAX_SNIPPETS);
        Ok(snippets)
    }
}

/// Tries each backend in order and returns the first non-empty snippet list.
///
/// Returns an empty list when at least one backend answered but none had
/// results, and an error only when every backend failed.
pub struct MultiResearcher {
    backends: Vec<(String, Arc<dyn Researcher>)>,
}

impl MultiResearcher {
    pub fn new(backends: Vec<(String, Arc<dyn Researcher>)>) -> Self {
        Self { backends }
    }

    pub fn from_config(config: &ResearchConfig) -> Self {
        let mut backends: Vec<(String, Arc<dyn Researcher>)> = Vec::new();
        if !config.google_api_key.is_empty() && !config.google_cse_id.is_empty() {
            backends.push((
                "google".into(),
                Arc::new(GoogleCseResearcher::new(
                    config.google_api_key.clone(),
                    config.google_cse_id.clone(),
                )),
            ));
        }
        if !config.disable_duckduckgo {
            backends.push(("duckduckgo".into(), Arc::new(DuckDuckGoResearcher::new())));
        }
        Self::new(backends)
    }
}

#[async_trait]
impl Researcher for MultiResearcher {
    async fn search(&self, query: &str) -> Result<Vec<String>, ResearchError> {
        let mut last_error = None;
        let mut answered = self.backends.is_empty();

        for (name, backend) in &self.backends {
            match backend.search(query).await {
                Ok(snippets) if !snippets.is_empty() => {
                    info!(backend = %name, count = snippets.len(), "research found snippets");
                    return Ok(snippets);
                }
                Ok(_) => {
                    debug!(backend = %name, "research returned no snippets");
                    answered = true;
                }
                Err(e) => {
                    debug!(backend = %name, error = %e, "research backend failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Canned researcher shared by tests across the crate.
    pub(crate) struct FixedResearcher {
        snippets: Option<Vec<String>>,
        pub(crate) calls: AtomicUsize,
    }

    impl FixedResearcher {
        pub(crate) fn with(snippets: &[&str]) -> Self {
            Self {
                snippets: Some(snippets.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn empty() -> Self {
            Self::with(&[])
        }

        pub(crate) fn broken() -> Self {
            Self {
                snippets: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Researcher for FixedResearcher {
        async fn search(&self, _query: &str) -> Result<Vec<String>, ResearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.snippets
                .clone()
                .ok_or_else(|| backend_error("fixed", "offline"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedResearcher;
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn query_wording() {
        assert_eq!(concept_query("entropy"), "what is entropy");
    }

    #[tokio::test]
    async fn google_prefers_snippet_over_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "what is entropy"))
            .and(query_param("cx", "cx-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"title": "Entropy - Wikipedia", "snippet": "Entropy is a measure of disorder."},
                    {"title": "Only a title", "snippet": ""}
                ]
            })))
            .mount(&server)
            .await;

        let r = GoogleCseResearcher::with_base_url("k".into(), "cx-1".into(), server.uri());
        let snippets = r.search("what is entropy").await.unwrap();
        assert_eq!(
            snippets,
            vec!["Entropy is a measure of disorder.", "Only a title"]
        );
    }

    #[tokio::test]
    async fn duckduckgo_collects_abstract_and_topics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"AbstractText":"Osmosis is diffusion of water.","RelatedTopics":[{"Text":"Reverse osmosis"},{"Text":""}]}"#,
            ))
            .mount(&server)
            .await;

        let r = DuckDuckGoResearcher::with_base_url(server.uri());
        let snippets = r.search("what is osmosis").await.unwrap();
        assert_eq!(
            snippets,
            vec!["Osmosis is diffusion of water.", "Reverse osmosis"]
        );
    }

    #[tokio::test]
    async fn multi_returns_first_non_empty() {
        let multi = MultiResearcher::new(vec![
            ("broken".into(), Arc::new(FixedResearcher::broken())),
            ("empty".into(), Arc::new(FixedResearcher::empty())),
            ("good".into(), Arc::new(FixedResearcher::with(&["a fact"]))),
        ]);
        assert_eq!(multi.search("q").await.unwrap(), vec!["a fact"]);
    }

    #[tokio::test]
    async fn multi_empty_when_some_backend_answered() {
        let multi = MultiResearcher::new(vec![
            ("broken".into(), Arc::new(FixedResearcher::broken())),
            ("empty".into(), Arc::new(FixedResearcher::empty())),
        ]);
        assert!(multi.search("q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multi_errors_when_all_backends_fail() {
        let multi = MultiResearcher::new(vec![(
            "broken".into(),
            Arc::new(FixedResearcher::broken()) as Arc<dyn Researcher>,
        )]);
        assert!(multi.search("q").await.is_err());
    }

    #[tokio::test]
    async fn multi_without_backends_is_empty() {
        let multi = MultiResearcher::new(vec![]);
        assert!(multi.search("q").await.unwrap().is_empty());
    }
}
