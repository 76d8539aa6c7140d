/// Generative Text Backend Module
///
/// Single-call client for an OpenAI-compatible chat completions endpoint
/// (Hugging Face router by default). Retrying is the caller's job; this module
/// only classifies failures and says how long to wait before the next try.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid API key (unauthorized)")]
    Unauthorized,

    #[error("rate limit exceeded{}", .retry_after.map(|s| format!(", retry after {}s", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    #[error("service unavailable, model may be overloaded")]
    ServiceUnavailable,

    #[error("request timed out")]
    Timeout,

    #[error("network connection error: {0}")]
    Connection(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
}

impl BackendError {
    /// How long to wait before retry number `attempt + 1`, or `None` when the
    /// error must not be retried. `attempt` is 0-based.
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        let secs = match self {
            BackendError::Unauthorized => return None,
            BackendError::RateLimited { retry_after } => {
                retry_after.map(|s| s.min(120)).unwrap_or(60)
            }
            BackendError::ServiceUnavailable => 30,
            BackendError::Timeout | BackendError::Connection(_) => 2u64.saturating_pow(attempt),
            BackendError::MalformedResponse(_) | BackendError::UnexpectedStatus { .. } => 5,
        };
        Some(Duration::from_secs(secs))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}

/// Anything that turns a persona instruction plus a task instruction into text
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct ChatCompletionsBackend {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsBackend {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextBackend for ChatCompletionsBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => BackendError::Unauthorized,
                429 => BackendError::RateLimited { retry_after },
                502..=504 => BackendError::ServiceUnavailable,
                code => BackendError::UnexpectedStatus {
                    status: code,
                    message: body,
                },
            });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::MalformedResponse(format!("{}: {}", e, body)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| BackendError::MalformedResponse("no completion returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_honours_retry_after_capped() {
        let err = BackendError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(err.retry_delay(0), Some(Duration::from_secs(30)));

        let err = BackendError::RateLimited {
            retry_after: Some(900),
        };
        assert_eq!(err.retry_delay(0), Some(Duration::from_secs(120)));

        let err = BackendError::RateLimited { retry_after: None };
        assert_eq!(err.retry_delay(2), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_service_unavailable_waits_thirty_seconds() {
        assert_eq!(
            BackendError::ServiceUnavailable.retry_delay(1),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_network_errors_back_off_exponentially() {
        let err = BackendError::Timeout;
        assert_eq!(err.retry_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(err.retry_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(err.retry_delay(3), Some(Duration::from_secs(8)));

        let err = BackendError::Connection("reset".to_string());
        assert_eq!(err.retry_delay(2), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_unauthorized_is_never_retried() {
        assert_eq!(BackendError::Unauthorized.retry_delay(0), None);
    }

    #[test]
    fn test_rate_limit_message_mentions_retry_after() {
        let err = BackendError::RateLimited {
            retry_after: Some(42),
        };
        assert_eq!(err.to_string(), "rate limit exceeded, retry after 42s");
    }
}
