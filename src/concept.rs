//! Concept keys and the records persisted for each learned concept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidates longer than this are treated as sentences, not concepts.
const MAX_KEY_CHARS: usize = 64;
const MAX_KEY_WORDS: usize = 4;

/// Normalizes a raw token into a concept key.
///
/// Lowercases, collapses whitespace and strips surrounding punctuation and list
/// markers. Returns `None` for tokens that cannot be concepts.
pub fn normalize_key(raw: &str) -> Option<String> {
    let mut trimmed = raw.trim();
    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && trimmed[digits..].starts_with(['.', ')']) {
        trimmed = &trimmed[digits + 1..];
    }
    let trimmed = trimmed.trim_start_matches(['-', '*', '•']);

    let words: Vec<String> = trimmed
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let joined = words.join(" ");
    let key = joined.trim_matches(|c: char| !c.is_alphanumeric());

    if key.is_empty()
        || key.chars().count() > MAX_KEY_CHARS
        || key.split(' ').count() > MAX_KEY_WORDS
        || !key.chars().any(|c| c.is_alphabetic())
    {
        return None;
    }
    Some(key.to_string())
}

/// Splits generator output on commas and newlines.
pub fn split_candidates(text: &str) -> Vec<String> {
    text.split([',', '\n', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The four dimensions of knowledge, plus user corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Factual,
    Conceptual,
    Procedural,
    Adversarial,
    Correction,
}

impl Category {
    /// Parses a model-produced label, tolerating case and trailing punctuation.
    pub fn parse(label: &str) -> Option<Self> {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_lowercase();
        match cleaned.as_str() {
            "factual" => Some(Category::Factual),
            "conceptual" => Some(Category::Conceptual),
            "procedural" => Some(Category::Procedural),
            "adversarial" => Some(Category::Adversarial),
            "correction" => Some(Category::Correction),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Factual => "factual",
            Category::Conceptual => "conceptual",
            Category::Procedural => "procedural",
            Category::Adversarial => "adversarial",
            Category::Correction => "correction",
        };
        write!(f, "{s}")
    }
}

/// Structured elaboration of a concept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub misconceptions: Vec<String>,
    /// Model output kept verbatim when it was not valid JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Which providers produced a record and which snippets informed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub synthesized_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_by: Option<String>,
    #[serde(default)]
    pub snippets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRecord {
    pub key: String,
    pub label: String,
    pub definition: String,
    pub category: Category,
    #[serde(default)]
    pub enrichment: Enrichment,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deepened: Option<DateTime<Utc>>,
    pub learned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_collapses() {
        assert_eq!(
            normalize_key("  Black   Hole ").as_deref(),
            Some("black hole")
        );
        assert_eq!(normalize_key("Photosynthesis.").as_deref(), Some("photosynthesis"));
    }

    #[test]
    fn normalize_strips_list_markers() {
        assert_eq!(normalize_key("12. entropy").as_deref(), Some("entropy"));
        assert_eq!(normalize_key("- osmosis").as_deref(), Some("osmosis"));
        assert_eq!(normalize_key("* \"gravity\"").as_deref(), Some("gravity"));
        assert_eq!(normalize_key("3D printing").as_deref(), Some("3d printing"));
    }

    #[test]
    fn normalize_rejects_non_concepts() {
        assert_eq!(normalize_key(""), None);
        assert_eq!(normalize_key("  ...  "), None);
        assert_eq!(normalize_key("1234"), None);
        assert_eq!(
            normalize_key("this is clearly a whole sentence rather than a concept"),
            None
        );
    }

    #[test]
    fn split_on_commas_and_newlines() {
        let parts = split_candidates("apple, banana\ncherry,, ;date\n");
        assert_eq!(parts, vec!["apple", "banana", "cherry", "date"]);
    }

    #[test]
    fn category_parse_is_lenient() {
        assert_eq!(Category::parse("Conceptual."), Some(Category::Conceptual));
        assert_eq!(Category::parse(" PROCEDURAL "), Some(Category::Procedural));
        assert_eq!(Category::parse("spicy"), None);
    }

    #[test]
    fn record_serialization_skips_empty_optionals() {
        let record = ConceptRecord {
            key: "entropy".into(),
            label: "Entropy".into(),
            definition: "Disorder.".into(),
            category: Category::Conceptual,
            enrichment: Enrichment::default(),
            provenance: Provenance {
                synthesized_by: "groq".into(),
                ..Default::default()
            },
            expanded_definition: None,
            last_deepened: None,
            learned_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("expanded_definition"));
        assert!(json.contains(r#""category":"conceptual""#));
    }
}
