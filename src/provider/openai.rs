//! OpenAI-compatible chat completions provider (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::http::{build_client, check_status, transport_error};
use super::{Prompt, TextProvider};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatProvider {
    name: String,
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiCompatProvider {
    /// Groq's hosted endpoint.
    pub fn groq(api_key: String, model: String) -> Self {
        Self::with_endpoint("groq", api_key, model, GROQ_URL.to_string())
    }

    pub fn with_endpoint(
        name: impl Into<String>,
        api_key: String,
        model: String,
        endpoint: String,
    ) -> Self {
        let model = if model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            model
        };
        Self {
            name: name.into(),
            api_key,
            model,
            endpoint,
            client: build_client(Duration::from_secs(60)),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "{} api key not set",
                self.name
            )));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: prompt.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiCompatProvider {
        OpenAiCompatProvider::with_endpoint(
            "groq",
            "gsk-test".into(),
            "llama".into(),
            format!("{}/chat/completions", server.uri()),
        )
    }

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama",
                "messages": [
                    {"role": "system", "content": "You are an expert educator."},
                    {"role": "user", "content": "Explain 'entropy'."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "A measure of disorder."}}]
            })))
            .mount(&server)
            .await;

        let prompt = Prompt::new("Explain 'entropy'.").with_system("You are an expert educator.");
        let text = provider(&server).generate(&prompt).await.unwrap();
        assert_eq!(text, "A measure of disorder.");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&Prompt::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn missing_choice_yields_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let text = provider(&server).generate(&Prompt::new("x")).await.unwrap();
        assert!(text.is_empty());
    }
}
