//! Synchronous correction flow: research a question again, synthesize a new
//! answer and remember it as a correction.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::concept::{Category, ConceptRecord, Enrichment, Provenance, normalize_key};
use crate::error::{AppError, AppResult};
use crate::provider::{FallbackChain, Prompt};
use crate::research::Researcher;
use crate::store::{KnowledgeStore, within};

/// Returned when every provider in the rethink chain failed.
pub const DEGRADED_MESSAGE: &str =
    "I'm having trouble reaching my knowledge sources right now. Please try again in a moment.";

/// Corrections live beside learned concepts without replacing them.
pub const CORRECTION_PREFIX: &str = "correction:";

const MAX_RESEARCH_CHARS: usize = 1000;
const MAX_KEY_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RethinkOutcome {
    pub answer: String,
    pub provider: Option<String>,
    pub degraded: bool,
}

pub struct RethinkService {
    researcher: Arc<dyn Researcher>,
    chain: FallbackChain,
    knowledge: Arc<dyn KnowledgeStore>,
    call_timeout: Duration,
}

impl RethinkService {
    pub fn new(
        researcher: Arc<dyn Researcher>,
        chain: FallbackChain,
        knowledge: Arc<dyn KnowledgeStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            researcher,
            chain,
            knowledge,
            call_timeout,
        }
    }

    pub async fn rethink(
        &self,
        question: &str,
        previous_answer: Option<&str>,
    ) -> AppResult<RethinkOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question must not be empty".into()));
        }

        let snippets = match tokio::time::timeout(self.call_timeout, self.researcher.search(question)).await {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(e)) => {
                warn!(error = %e, "rethink research failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                warn!("rethink research timed out, continuing without context");
                Vec::new()
            }
        };

        let generation = match self.chain.generate(&correction_prompt(question, previous_answer, &snippets)).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "rethink chain exhausted");
                return Ok(RethinkOutcome {
                    answer: DEGRADED_MESSAGE.to_string(),
                    provider: None,
                    degraded: true,
                });
            }
        };

        let key = correction_key(question);
        let record = ConceptRecord {
            key: key.clone(),
            label: question.to_string(),
            definition: generation.text.clone(),
            category: Category::Correction,
            enrichment: Enrichment::default(),
            provenance: Provenance {
                synthesized_by: generation.provider.clone(),
                enriched_by: None,
                snippets,
            },
            expanded_definition: None,
            last_deepened: None,
            learned_at: Utc::now(),
        };
        match within(self.call_timeout, self.knowledge.put(&record)).await {
            Ok(()) => info!(key = %key, provider = %generation.provider, "correction stored"),
            Err(e) => warn!(key = %key, error = %e, "could not store correction"),
        }

        Ok(RethinkOutcome {
            answer: generation.text,
            provider: Some(generation.provider),
            degraded: false,
        })
    }
}

/// Short questions key like concepts; longer ones keep their wording.
fn correction_key(question: &str) -> String {
    let key = normalize_key(question).unwrap_or_else(|| {
        let collapsed = question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        collapsed
            .trim_matches(|c: char| !c.is_alphanumeric())
            .chars()
            .take(MAX_KEY_CHARS)
            .collect()
    });
    format!("{CORRECTION_PREFIX}{key}")
}

fn correction_prompt(question: &str, previous: Option<&str>, snippets: &[String]) -> Prompt {
    let research = if snippets.is_empty() {
        "(no research material found)".to_string()
    } else {
        let joined = snippets.join("\n");
        joined.chars().take(MAX_RESEARCH_CHARS).collect()
    };
    let previous = previous
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("(not available)");

    Prompt::new(format!(
        "Original Question: {question}\n\n\
         My Previous (Incorrect) Answer: {previous}\n\n\
         New Research Material:\n{research}\n\n\
         Please provide the corrected answer:"
    ))
    .with_system(
        "You are an assistant who just gave an incorrect answer. You have done new research \
         and need to provide a corrected, accurate response. Acknowledge the mistake briefly, \
         then clearly explain the correct information based on the new research.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::chain::testing::ScriptedProvider;
    use crate::provider::{ProviderError, TextProvider};
    use crate::research::testing::FixedResearcher;
    use crate::store::MemoryStore;
    use crate::store::tests_support::record;

    fn service(
        researcher: FixedResearcher,
        providers: Vec<Arc<ScriptedProvider>>,
    ) -> (RethinkService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let chain = FallbackChain::new(
            "rethink",
            providers
                .into_iter()
                .map(|p| p as Arc<dyn TextProvider>)
                .collect(),
            Duration::from_secs(1),
        );
        (
            RethinkService::new(Arc::new(researcher), chain, store.clone(), Duration::from_secs(1)),
            store,
        )
    }

    #[tokio::test]
    async fn answers_without_research_snippets() {
        let gemini = Arc::new(ScriptedProvider::with("gemini", |p| {
            assert!(p.user.contains("(no research material found)"));
            Ok("Paris is the capital of France.".into())
        }));
        let (svc, store) = service(FixedResearcher::empty(), vec![gemini]);

        let out = svc
            .rethink("What is the capital of France?", Some("Lyon"))
            .await
            .unwrap();
        assert_eq!(out.answer, "Paris is the capital of France.");
        assert_eq!(out.provider.as_deref(), Some("gemini"));
        assert!(!out.degraded);

        let stored = store
            .get("correction:what is the capital of france")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.category, Category::Correction);
    }

    #[tokio::test]
    async fn correction_leaves_learned_record_intact() {
        let p = Arc::new(ScriptedProvider::answering("gemini", "Osmosis is diffusion of water."));
        let (svc, store) = service(FixedResearcher::empty(), vec![p]);
        let mut learned = record("osmosis");
        learned.enrichment.related = vec!["diffusion".into()];
        learned.expanded_definition = Some("long".into());
        store.put(&learned).await.unwrap();

        let out = svc.rethink("Osmosis?", Some("a dance")).await.unwrap();
        assert!(!out.degraded);

        let kept = store.get("osmosis").await.unwrap().unwrap();
        assert_eq!(kept, learned);
        let correction = store.get("correction:osmosis").await.unwrap().unwrap();
        assert_eq!(correction.category, Category::Correction);
        assert_eq!(correction.definition, "Osmosis is diffusion of water.");

        let known: Vec<_> = store.known(10).await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(known, vec!["osmosis"]);
    }

    #[tokio::test]
    async fn research_failure_is_not_surfaced() {
        let p = Arc::new(ScriptedProvider::answering("groq", "corrected"));
        let (svc, _) = service(FixedResearcher::broken(), vec![p]);
        let out = svc.rethink("why is the sky blue", None).await.unwrap();
        assert_eq!(out.answer, "corrected");
    }

    #[tokio::test]
    async fn exhausted_chain_degrades() {
        let a = Arc::new(ScriptedProvider::failing("gemini", || ProviderError::Timeout));
        let b = Arc::new(ScriptedProvider::failing("groq", || ProviderError::Empty));
        let (svc, store) = service(FixedResearcher::with(&["fact"]), vec![a, b]);

        let out = svc.rethink("osmosis", None).await.unwrap();
        assert!(out.degraded);
        assert_eq!(out.answer, DEGRADED_MESSAGE);
        assert!(out.provider.is_none());
        assert!(store.get("correction:osmosis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let p = Arc::new(ScriptedProvider::answering("groq", "x"));
        let (svc, _) = service(FixedResearcher::empty(), vec![p.clone()]);
        assert!(matches!(
            svc.rethink("   ", None).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(p.call_count(), 0);
    }

    #[test]
    fn correction_keys() {
        assert_eq!(correction_key("  Osmosis? "), "correction:osmosis");
        assert_eq!(
            correction_key("Why does  the Moon look bigger near the horizon?"),
            "correction:why does the moon look bigger near the horizon"
        );
    }
}
