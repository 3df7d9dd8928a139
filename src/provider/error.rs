//! Tipos de erro para os provedores de geração de texto.
//!
//! Define [`ProviderError`] com variantes para timeout, rate limiting, erros do
//! servidor e requisições malformadas, e [`ChainError`] para o resultado da
//! cadeia de fallback. A classificação [`FailureClass`] decide se a cadeia
//! avança para o próximo provedor ou aborta.

use thiserror::Error;

/// Como a cadeia de fallback deve reagir a uma falha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Avança para o próximo provedor (timeout, quota, erro 5xx, rede).
    Transient,
    /// Aborta a cadeia imediatamente (requisição malformada).
    Permanent,
}

/// Erros que podem ocorrer ao chamar um provedor.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A chamada excedeu o timeout declarado.
    #[error("request timed out")]
    Timeout,

    /// O servidor retornou HTTP 429 (rate limit ou quota excedida).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro 5xx retornado pelo provedor.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Provedor não configurado ou credenciais recusadas.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// O provedor rejeitou a requisição como malformada (400/413/422).
    #[error("malformed request: {0}")]
    Malformed(String),

    /// O provedor respondeu com sucesso mas sem texto.
    #[error("provider returned empty output")]
    Empty,

    /// A resposta não pôde ser interpretada.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ProviderError {
    /// Classifica a falha para a cadeia de fallback.
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::Malformed(_) => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }
}

/// Uma tentativa falha registrada durante a execução da cadeia.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub error: String,
}

/// Resultado de falha da cadeia de fallback como um todo.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Um provedor classificou a requisição como permanentemente inválida.
    #[error("provider {provider} rejected the request: {source}")]
    Permanent {
        provider: String,
        source: ProviderError,
    },

    /// Todos os provedores falharam de forma transitória.
    #[error("all providers failed ({})", describe_attempts(.attempts))]
    Exhausted { attempts: Vec<ProviderAttempt> },
}

fn describe_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}
