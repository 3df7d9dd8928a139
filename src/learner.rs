//! The per-concept pipeline shared by every job mode: store re-check,
//! research, synthesis, enrichment and persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::categorizer::Categorizer;
use crate::concept::{Category, ConceptRecord, Enrichment, Provenance};
use crate::error::ErrorKind;
use crate::provider::{Chains, FallbackChain, Prompt};
use crate::research::{ResearchError, Researcher, concept_query};
use crate::state_machine::ErrorDescriptor;
use crate::store::{KnowledgeStore, StoreError, within};

/// Snippet text beyond this is not sent to the synthesis prompt.
const MAX_CONTEXT_CHARS: usize = 2000;

/// What happened to one candidate.
#[derive(Debug)]
pub enum LearnOutcome {
    /// A new record was persisted and the key marked processed.
    Learned(Box<ConceptRecord>),
    /// The knowledge store already had the concept; it was only marked processed.
    AlreadyKnown,
    /// Some stage failed. Nothing was marked processed.
    Failed(ErrorDescriptor),
}

#[derive(Debug, Default, Deserialize)]
struct EnrichmentReply {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    related: Vec<String>,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    misconceptions: Vec<String>,
}

pub struct ConceptLearner {
    knowledge: Arc<dyn KnowledgeStore>,
    researcher: Arc<dyn Researcher>,
    synthesis: FallbackChain,
    enrichment: FallbackChain,
    deepen: FallbackChain,
    call_timeout: Duration,
}

impl ConceptLearner {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        researcher: Arc<dyn Researcher>,
        chains: &Chains,
        call_timeout: Duration,
    ) -> Self {
        Self {
            knowledge,
            researcher,
            synthesis: chains.synthesis.clone(),
            enrichment: chains.enrichment.clone(),
            deepen: chains.deepen.clone(),
            call_timeout,
        }
    }

    pub fn knowledge(&self) -> &Arc<dyn KnowledgeStore> {
        &self.knowledge
    }

    /// Runs the full pipeline for one normalized key.
    pub async fn learn(&self, key: &str, label: &str) -> LearnOutcome {
        match self.try_learn(key, label).await {
            Ok(outcome) => outcome,
            Err(descriptor) => {
                warn!(concept = key, kind = %descriptor.kind, error = %descriptor.message, "concept failed");
                LearnOutcome::Failed(descriptor)
            }
        }
    }

    async fn try_learn(&self, key: &str, label: &str) -> Result<LearnOutcome, ErrorDescriptor> {
        let fail = |kind: ErrorKind, msg: String| ErrorDescriptor::new(kind, msg).for_concept(key);
        let store_fail = |e: StoreError| fail(ErrorKind::Persistence, e.to_string());

        if within(self.call_timeout, self.knowledge.get(key))
            .await
            .map_err(store_fail)?
            .is_some()
        {
            within(self.call_timeout, self.knowledge.mark_processed(key))
                .await
                .map_err(store_fail)?;
            debug!(concept = key, "already known");
            return Ok(LearnOutcome::AlreadyKnown);
        }

        let snippets = self
            .research(&concept_query(label))
            .await
            .map_err(|e| fail(ErrorKind::Research, e.to_string()))?;

        let synthesized = self
            .synthesis
            .generate(&synthesis_prompt(label, &snippets))
            .await
            .map_err(|e| fail(ErrorKind::from(&e), e.to_string()))?;

        let enriched = self
            .enrichment
            .generate(&enrichment_prompt(label, &synthesized.text))
            .await
            .map_err(|e| fail(ErrorKind::from(&e), e.to_string()))?;
        let (category, enrichment) = parse_enrichment(&enriched.text, &synthesized.text);

        let record = ConceptRecord {
            key: key.to_string(),
            label: label.to_string(),
            definition: synthesized.text,
            category,
            enrichment,
            provenance: Provenance {
                synthesized_by: synthesized.provider,
                enriched_by: Some(enriched.provider),
                snippets,
            },
            expanded_definition: None,
            last_deepened: None,
            learned_at: Utc::now(),
        };

        within(self.call_timeout, self.knowledge.put(&record))
            .await
            .map_err(store_fail)?;
        within(self.call_timeout, self.knowledge.mark_processed(key))
            .await
            .map_err(store_fail)?;

        info!(concept = key, %category, "concept learned");
        Ok(LearnOutcome::Learned(Box::new(record)))
    }

    /// Research bounded by the call timeout.
    pub async fn research(&self, query: &str) -> Result<Vec<String>, ResearchError> {
        tokio::time::timeout(self.call_timeout, self.researcher.search(query))
            .await
            .map_err(|_| ResearchError::Timeout)?
    }

    /// Expands a known concept through the deepen chain and stores the result.
    pub async fn deepen(&self, record: ConceptRecord) -> Result<ConceptRecord, ErrorDescriptor> {
        let key = record.key.clone();
        let fail = |kind: ErrorKind, msg: String| ErrorDescriptor::new(kind, msg).for_concept(&key);

        let expanded = self
            .deepen
            .generate(&deepen_prompt(&record))
            .await
            .map_err(|e| fail(ErrorKind::from(&e), e.to_string()))?;

        let mut updated = record;
        updated.expanded_definition = Some(expanded.text);
        updated.last_deepened = Some(Utc::now());
        within(self.call_timeout, self.knowledge.put(&updated))
            .await
            .map_err(|e| fail(ErrorKind::Persistence, e.to_string()))?;

        info!(concept = %key, provider = %expanded.provider, "concept deepened");
        Ok(updated)
    }
}

fn synthesis_prompt(label: &str, snippets: &[String]) -> Prompt {
    if snippets.is_empty() {
        return Prompt::new(format!("Explain '{label}' in 2-3 sentences."))
            .with_system("You are an expert educator.")
            .with_max_tokens(300);
    }

    let mut context = String::new();
    for snippet in snippets {
        if context.len() + snippet.len() > MAX_CONTEXT_CHARS {
            break;
        }
        context.push_str("- ");
        context.push_str(snippet);
        context.push('\n');
    }
    Prompt::new(format!("Provide a 2-3 sentence definition for: {label}"))
        .with_system(format!(
            "You are an expert summarizer. Given the following research snippets, \
             produce a concise definition for '{label}'. Answer directly without \
             introductory phrases.\n\n{context}"
        ))
        .with_max_tokens(300)
}

fn enrichment_prompt(label: &str, definition: &str) -> Prompt {
    Prompt::new(format!(
        "For the term '{label}' defined as:\n{definition}\n\n\
         Return a JSON object with keys: category (one of factual, conceptual, \
         procedural, adversarial), related (array of 5 related concepts), \
         examples (array of 2 examples), misconceptions (array of common \
         misconceptions). Use concise values and return only the JSON."
    ))
    .with_system("You are a knowledge graph builder.")
    .with_max_tokens(600)
}

fn deepen_prompt(record: &ConceptRecord) -> Prompt {
    let current: String = record.definition.chars().take(300).collect();
    Prompt::new(format!(
        "Expand and deepen this explanation of '{}':\nCurrent: {current}\n\n\
         Provide:\n1. More detailed explanation\n2. Practical applications\n\
         3. Related concepts\n4. Common misconceptions",
        record.label
    ))
    .with_max_tokens(1024)
}

/// Slices the outermost JSON object out of model output, tolerating code fences
/// and surrounding prose.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_enrichment(text: &str, definition: &str) -> (Category, Enrichment) {
    let parsed = extract_json(text).and_then(|j| serde_json::from_str::<EnrichmentReply>(j).ok());
    match parsed {
        Some(reply) => {
            let category = reply
                .category
                .as_deref()
                .and_then(Category::parse)
                .filter(|c| *c != Category::Correction)
                .unwrap_or_else(|| Categorizer::classify(definition));
            (
                category,
                Enrichment {
                    related: reply.related,
                    examples: reply.examples,
                    misconceptions: reply.misconceptions,
                    raw: None,
                },
            )
        }
        None => (
            Categorizer::classify(definition),
            Enrichment {
                raw: Some(text.to_string()),
                ..Default::default()
            },
        ),
    }
}
