//! Translate capability backed by the OpenAI chat-completions API.

use crate::error::TranslateError;
use crate::retry::{with_retry_if, RetryConfig};
use crate::translator::{language_name, Translator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// OpenAI Chat Completion request body
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

fn build_system_prompt(target_language: &str) -> String {
    format!(
        r#"You are a professional translator. Translate the content you are given to {}.

## Rules
- Return only the translation, with no explanations or surrounding quotes
- Preserve all HTML tags, attributes and entities exactly as they are
- Preserve shortcodes (e.g. [gallery id="3"]), URLs and email addresses
- Preserve line breaks and whitespace structure
- Do not translate proper names of people, companies and products
- Keep the tone and register of the original"#,
        target_language
    )
}

/// Failure of a single HTTP attempt.
#[derive(Debug)]
enum CallError {
    Status { status: u16, body: String },
    Network { message: String, timed_out: bool },
    InvalidResponse(String),
}

impl CallError {
    /// 429, 5xx and network failures are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Status { status, .. } => *status == 429 || *status >= 500,
            CallError::Network { .. } => true,
            CallError::InvalidResponse(_) => false,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Status { status, body } => write!(f, "OpenAI API error ({}): {}", status, body),
            CallError::Network { message, .. } => write!(f, "request to OpenAI API failed: {}", message),
            CallError::InvalidResponse(msg) => write!(f, "invalid OpenAI response: {}", msg),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        CallError::Network {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

pub struct OpenAiTranslator {
    client: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiTranslator {
    pub fn new(settings: OpenAiSettings) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TranslateError::CapabilityFailure(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    fn build_request(&self, text: &str, target_language: &str) -> ChatRequest {
        // Reasoning models don't support temperature - use reasoning_effort instead
        let is_reasoning = is_reasoning_model(&self.settings.model);
        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: build_system_prompt(language_name(target_language)),
                },
                Message {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: if is_reasoning {
                None
            } else {
                Some(self.settings.temperature)
            },
            reasoning_effort: if is_reasoning {
                Some("low".to_string())
            } else {
                None
            },
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, CallError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(CallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::InvalidResponse(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CallError::InvalidResponse("response contained no choices".to_string()))
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
        let request = self.build_request(text, target_language);
        debug!(
            "Translating {} chars to {} with {}",
            text.len(),
            target_language,
            self.settings.model
        );

        with_retry_if(
            &self.settings.retry,
            &format!("Translation to {}", language_name(target_language)),
            || self.send(&request),
            CallError::is_retryable,
        )
        .await
        .map_err(|e| match e {
            CallError::Network { timed_out: true, .. } => TranslateError::Timeout(self.settings.timeout.as_secs()),
            other => TranslateError::CapabilityFailure(other.to_string()),
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
