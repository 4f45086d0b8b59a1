//! Chat client for OpenAI-compatible `/v1/chat/completions` endpoints.
//!
//! Non-success responses keep their HTTP status so the summarizer can tell
//! rate limiting and outages apart from bad credentials.

use crate::config::LlmConfig;
use crate::error::{PageTreeError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A hung call surfaces as an HTTP failure and is retried.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
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
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Error for a non-success response. OpenAI-style error bodies are reduced
/// to their message; anything else is kept as-is.
pub(crate) fn status_error(status: u16, body: String) -> PageTreeError {
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|api_error| api_error.error.message)
        .unwrap_or(body);
    PageTreeError::LlmStatus { status, message }
}

/// Text of the first choice in a completion body.
fn completion_text(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| PageTreeError::LlmApi("No choices in response".to_string()))
}

/// Client for the summarization model.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    /// Send one user message, optionally preceded by a system prompt, and
    /// return the model's reply.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(content) = system {
            messages.push(Message {
                role: Role::System,
                content,
            });
        }
        messages.push(Message {
            role: Role::User,
            content: user,
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }

        let text = completion_text(&body)?;
        debug!(model = %self.config.model, chars = text.len(), "Chat completion finished");
        Ok(text)
    }

    /// Check that the endpoint answers a trivial prompt.
    pub async fn test_connection(&self) -> Result<()> {
        let reply = self
            .complete(None, "Say 'hello' and nothing else.")
            .await?;
        if reply.to_lowercase().contains("hello") {
            Ok(())
        } else {
            Err(PageTreeError::LlmApi(format!("Unexpected response: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;

    #[test]
    fn test_rate_limit_body_keeps_status() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let err = status_error(429, body.to_string());
        assert!(matches!(
            &err,
            PageTreeError::LlmStatus { status: 429, message } if message == "Rate limit reached"
        ));
        assert!(CapabilityError::from(err).is_transient());
    }

    #[test]
    fn test_unstructured_error_body_is_kept() {
        let err = status_error(401, "unauthorized".to_string());
        assert!(matches!(
            &err,
            PageTreeError::LlmStatus { status: 401, message } if message == "unauthorized"
        ));
        assert!(!CapabilityError::from(err).is_transient());
    }

    #[test]
    fn test_completion_text() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"A summary."},"finish_reason":"stop"}]}"#;
        assert_eq!(completion_text(body).unwrap(), "A summary.");

        assert!(matches!(
            completion_text(r#"{"choices":[]}"#),
            Err(PageTreeError::LlmApi(_))
        ));
        assert!(matches!(
            completion_text("<html>bad gateway</html>"),
            Err(PageTreeError::Serialization(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![
                Message {
                    role: Role::System,
                    content: "Summarize.",
                },
                Message {
                    role: Role::User,
                    content: "page 1",
                },
            ],
            max_tokens: 256,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "page 1");
        assert_eq!(json["max_tokens"], 256);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        for base in ["https://api.example.com/", "https://api.example.com"] {
            let client = LlmClient::new(LlmConfig {
                api_base: base.to_string(),
                ..Default::default()
            });
            assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
        }
    }
}
