//! Local model endpoint speaking `{"prompt"}` → `{"response"}` JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{build_client, check_status, transport_error};
use super::{Prompt, TextProvider};

#[derive(Debug, Serialize)]
struct IgnisRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct IgnisResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub struct IgnisProvider {
    url: Option<String>,
    client: Client,
}

impl IgnisProvider {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url: url.filter(|u| !u.is_empty()),
            client: build_client(Duration::from_secs(15)),
        }
    }
}

#[async_trait]
impl TextProvider for IgnisProvider {
    fn name(&self) -> &str {
        "ignis"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let Some(url) = &self.url else {
            return Err(ProviderError::Unavailable("IGNIS_API_URL not set".into()));
        };

        // The endpoint has no system slot, so the instruction is prepended.
        let full = match &prompt.system {
            Some(system) => format!("{system}\n\n{}", prompt.user),
            None => prompt.user.clone(),
        };

        let response = self
            .client
            .post(url)
            .json(&IgnisRequest { prompt: &full })
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let parsed: IgnisResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.response.or(parsed.text).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn prepends_system_instruction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"prompt": "Be brief.\n\nWhat is rust?"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "A metal."})),
            )
            .mount(&server)
            .await;

        let provider = IgnisProvider::new(Some(server.uri()));
        let text = provider
            .generate(&Prompt::new("What is rust?").with_system("Be brief."))
            .await
            .unwrap();
        assert_eq!(text, "A metal.");
    }

    #[tokio::test]
    async fn unconfigured_is_unavailable() {
        let provider = IgnisProvider::new(Some(String::new()));
        let err = provider.generate(&Prompt::new("x")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
