//! Text-generation providers and the fallback chain that orders them.

pub mod anthropic;
pub mod chain;
pub mod error;
pub mod gemini;
mod http;
pub mod ignis;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use anthropic::AnthropicProvider;
pub use chain::FallbackChain;
pub use error::{ChainError, FailureClass, ProviderAttempt, ProviderError};
pub use gemini::GeminiProvider;
pub use ignis::IgnisProvider;
pub use openai::OpenAiCompatProvider;

use crate::config::{ChainsConfig, ProvidersConfig};
use crate::error::AppError;

/// A single request to a text-generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
}

impl Prompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            max_tokens: 1024,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text produced by the chain, tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub provider: String,
}

/// Synchronous-looking text-in/text-or-failure-out call.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// Named providers available to build chains from.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn TextProvider>>,
}

impl ProviderSet {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut set = Self::default();

        let anthropic = &config.anthropic;
        set.insert(Arc::new(match &anthropic.base_url {
            Some(url) => AnthropicProvider::with_base_url(
                anthropic.api_key.clone(),
                anthropic.model.clone(),
                url.clone(),
            ),
            None => AnthropicProvider::new(anthropic.api_key.clone(), anthropic.model.clone()),
        }));

        let groq = &config.groq;
        set.insert(Arc::new(match &groq.base_url {
            Some(url) => OpenAiCompatProvider::with_endpoint(
                "groq",
                groq.api_key.clone(),
                groq.model.clone(),
                url.clone(),
            ),
            None => OpenAiCompatProvider::groq(groq.api_key.clone(), groq.model.clone()),
        }));

        let gemini = &config.gemini;
        set.insert(Arc::new(match &gemini.base_url {
            Some(url) => GeminiProvider::with_base_url(
                gemini.api_key.clone(),
                gemini.model.clone(),
                url.clone(),
            ),
            None => GeminiProvider::new(gemini.api_key.clone(), gemini.model.clone()),
        }));

        set.insert(Arc::new(IgnisProvider::new(config.ignis.url.clone())));
        set
    }

    pub fn insert(&mut self, provider: Arc<dyn TextProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Builds a chain from provider names; unknown names are a config error.
    pub fn chain(
        &self,
        label: &'static str,
        names: &[String],
        call_timeout: Duration,
    ) -> Result<FallbackChain, AppError> {
        let providers = names
            .iter()
            .map(|name| {
                self.providers.get(name).cloned().ok_or_else(|| {
                    AppError::Config(format!("chain '{label}' names unknown provider '{name}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FallbackChain::new(label, providers, call_timeout))
    }
}

/// One chain per call site, each with its own provider ordering.
#[derive(Clone)]
pub struct Chains {
    pub generation: FallbackChain,
    pub synthesis: FallbackChain,
    pub enrichment: FallbackChain,
    pub deepen: FallbackChain,
    pub rethink: FallbackChain,
}

impl Chains {
    pub fn build(
        set: &ProviderSet,
        config: &ChainsConfig,
        call_timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            generation: set.chain("generation", &config.generation, call_timeout)?,
            synthesis: set.chain("synthesis", &config.synthesis, call_timeout)?,
            enrichment: set.chain("enrichment", &config.enrichment, call_timeout)?,
            deepen: set.chain("deepen", &config.deepen, call_timeout)?,
            rethink: set.chain("rethink", &config.rethink, call_timeout)?,
        })
    }

    /// Every call site shares one chain. Used by tests and single-provider setups.
    pub fn uniform(chain: FallbackChain) -> Self {
        Self {
            generation: chain.clone(),
            synthesis: chain.clone(),
            enrichment: chain.clone(),
            deepen: chain.clone(),
            rethink: chain,
        }
    }
}
