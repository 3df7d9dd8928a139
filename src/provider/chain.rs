use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{ChainError, FailureClass, ProviderAttempt, ProviderError};
use super::{Generation, Prompt, TextProvider};

/// Ordered text-generation providers with automatic failover.
///
/// Each attempt is bounded by `call_timeout`. Transient failures advance to the
/// next provider; a permanent failure aborts the chain. Output is never
/// substituted: when every provider fails the caller gets
/// [`ChainError::Exhausted`].
#[derive(Clone)]
pub struct FallbackChain {
    label: &'static str,
    providers: Vec<Arc<dyn TextProvider>>,
    call_timeout: Duration,
}

impl FallbackChain {
    pub fn new(
        label: &'static str,
        providers: Vec<Arc<dyn TextProvider>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            label,
            providers,
            call_timeout,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Provider names in attempt order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn generate(&self, prompt: &Prompt) -> Result<Generation, ChainError> {
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let name = provider.name();
            debug!(chain = self.label, provider = name, "attempting provider");

            let result = match timeout(self.call_timeout, provider.generate(prompt)).await {
                Ok(Ok(text)) if text.trim().is_empty() => Err(ProviderError::Empty),
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Ok(text) => {
                    if !attempts.is_empty() {
                        info!(
                            chain = self.label,
                            provider = name,
                            failed_before = attempts.len(),
                            "fallback provider succeeded"
                        );
                    }
                    return Ok(Generation {
                        text: text.trim().to_string(),
                        provider: name.to_string(),
                    });
                }
                Err(err) if err.class() == FailureClass::Permanent => {
                    warn!(chain = self.label, provider = name, error = %err, "permanent provider failure");
                    return Err(ChainError::Permanent {
                        provider: name.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(chain = self.label, provider = name, error = %err, "provider failed, falling back");
                    attempts.push(ProviderAttempt {
                        provider: name.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        warn!(chain = self.label, "all providers failed");
        Err(ChainError::Exhausted { attempts })
    }
}
