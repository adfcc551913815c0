use super::error::CollaboratorError;
use crate::config::LlmProfile;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout applied by the chat client.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Anything that turns a conversation into generated text.
///
/// Implementations report categorized failures; they must not retry on their
/// own, since the orchestrator decides what is retried.
pub trait TextGenerator {
    fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<String, CollaboratorError>> + Send;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(CollaboratorError::NotConfigured(
                "no API endpoint set".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
        })
    }

    /// Client for a configured profile using the default timeout.
    pub fn from_profile(profile: &LlmProfile) -> Result<Self, CollaboratorError> {
        if profile.model.trim().is_empty() {
            return Err(CollaboratorError::NotConfigured(format!(
                "profile '{}' has no model",
                profile.name
            )));
        }
        Self::new(
            profile.endpoint.clone(),
            profile.resolved_api_key(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TextGenerator for ChatClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        debug!(endpoint = %self.endpoint, model, "sending chat completion request");
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 => CollaboratorError::Unauthorized,
                429 => CollaboratorError::RateLimited,
                code => CollaboratorError::Http {
                    status: code,
                    body: truncate_str(&text, MAX_ERROR_CONTENT_LEN).to_string(),
                },
            });
        }

        extract_content(&text)
    }
}

fn map_transport_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else if err.is_decode() {
        CollaboratorError::MalformedResponse(err.to_string())
    } else {
        CollaboratorError::Connection(err.to_string())
    }
}

/// Pull `choices[0].message.content` out of a response envelope.
fn extract_content(body: &str) -> Result<String, CollaboratorError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        CollaboratorError::MalformedResponse(format!(
            "{} ({})",
            e,
            truncate_str(body, MAX_ERROR_CONTENT_LEN)
        ))
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            CollaboratorError::MalformedResponse("response contained no message content".into())
        })
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
