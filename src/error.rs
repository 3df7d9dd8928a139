use thiserror::Error;

use crate::provider::ChainError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Provider chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Classifies a failure recorded in a job's error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The concept-generation collaborator failed.
    Generation,
    /// The research collaborator failed for one concept.
    Research,
    /// A provider rejected the request as malformed.
    ProviderPermanent,
    /// Every provider in the chain failed transiently.
    ProviderExhausted,
    /// A knowledge or job write failed.
    Persistence,
    /// A collaborator was unreachable before the first round.
    Setup,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Generation => write!(f, "generation"),
            ErrorKind::Research => write!(f, "research"),
            ErrorKind::ProviderPermanent => write!(f, "provider_permanent"),
            ErrorKind::ProviderExhausted => write!(f, "provider_exhausted"),
            ErrorKind::Persistence => write!(f, "persistence"),
            ErrorKind::Setup => write!(f, "setup"),
        }
    }
}

impl From<&ChainError> for ErrorKind {
    fn from(err: &ChainError) -> Self {
        match err {
            ChainError::Permanent { .. } => ErrorKind::ProviderPermanent,
            ChainError::Exhausted { .. } => ErrorKind::ProviderExhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;

    #[test]
    fn not_found_display() {
        let err = AppError::NotFound("abc".into());
        assert_eq!(err.to_string(), "Job not found: abc");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ProviderExhausted).unwrap();
        assert_eq!(json, r#""provider_exhausted""#);
    }

    #[test]
    fn error_kind_from_chain_error() {
        let permanent = ChainError::Permanent {
            provider: "groq".into(),
            source: ProviderError::Malformed("bad".into()),
        };
        assert_eq!(ErrorKind::from(&permanent), ErrorKind::ProviderPermanent);

        let exhausted = ChainError::Exhausted { attempts: vec![] };
        assert_eq!(ErrorKind::from(&exhausted), ErrorKind::ProviderExhausted);
    }
}
