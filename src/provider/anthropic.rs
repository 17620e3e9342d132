//! Anthropic Messages API client.
//!
//! Speaks the Messages API directly: system prompt as a system content
//! block (with an ephemeral `cache_control` hint when requested, so
//! repeat calls bill the prompt at the cache-read tier), messages as
//! text blocks, usage parsed including the cache-tier token counts.
//!
//! See: <https://docs.anthropic.com/en/api/messages>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionProvider, CompletionRequest, ProviderCompletion, Role};
use crate::cost::TokenUsage;
use crate::{MuninError, Result};

/// Default base URL for the Anthropic API.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Default request timeout.
///
/// Without one, a hung provider call wedges its request forever. 60s
/// comfortably covers a full 8k-token completion.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    http: Client,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into(),
        }
    }

    fn build_body<'a>(request: &'a CompletionRequest) -> MessagesBody<'a> {
        let system = if request.system_prompt.is_empty() {
            None
        } else {
            Some(vec![SystemBlock {
                kind: "text",
                text: &request.system_prompt,
                cache_control: request
                    .cache_system_prompt
                    .then_some(CacheControl { kind: "ephemeral" }),
            }])
        };

        MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderCompletion> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| MuninError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), retry_after, &body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| MuninError::Http(e.to_string()))?;

        let block = parsed
            .content
            .into_iter()
            .next()
            .ok_or(MuninError::EmptyResponse)?;
        // Only text blocks are acceptable here; tool-use or anything
        // else means the completion cannot be an analysis payload.
        if block.kind != "text" {
            return Err(MuninError::Parsing(format!(
                "unexpected content block type '{}'",
                block.kind
            )));
        }
        if block.text.is_empty() {
            return Err(MuninError::EmptyResponse);
        }

        Ok(ProviderCompletion {
            content: block.text,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
                cache_creation_input_tokens: parsed.usage.cache_creation_input_tokens,
                cache_read_input_tokens: parsed.usage.cache_read_input_tokens,
            },
            model: parsed.model,
            stop_reason: parsed.stop_reason,
        })
    }
}

/// Classify a non-2xx provider response.
fn classify_error(status: u16, retry_after: Option<Duration>, body: &str) -> MuninError {
    match status {
        429 => MuninError::RateLimited { retry_after },
        401 | 403 => MuninError::AuthenticationFailed,
        _ => MuninError::Api {
            status,
            message: extract_error_message(body),
        },
    }
}

/// Pull the human-readable message out of an Anthropic error body,
/// falling back to a generic label when the body isn't the documented
/// `{"error": {"message": ...}}` shape.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "provider request failed".to_string())
}

// Wire types

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock<'a>>>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct SystemBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: WireUsage,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    fn request(cache: bool) -> CompletionRequest {
        CompletionRequest {
            model: "claude-3-5-sonnet-20241022".into(),
            system_prompt: "You are a marketing analyst.".into(),
            cache_system_prompt: cache,
            messages: vec![ChatMessage::user("analyse this")],
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    #[test]
    fn body_includes_cache_control_when_requested() {
        let body = serde_json::to_value(AnthropicClient::build_body(&request(true))).unwrap();
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn body_omits_cache_control_when_not_requested() {
        let body = serde_json::to_value(AnthropicClient::build_body(&request(false))).unwrap();
        assert!(body["system"][0].get("cache_control").is_none());
    }

    #[test]
    fn body_omits_empty_system_prompt() {
        let mut req = request(false);
        req.system_prompt.clear();
        let body = serde_json::to_value(AnthropicClient::build_body(&req)).unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn classify_429_with_retry_after() {
        let err = classify_error(429, Some(Duration::from_secs(7)), "");
        match err {
            MuninError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn classify_auth_failures() {
        assert!(matches!(
            classify_error(401, None, ""),
            MuninError::AuthenticationFailed
        ));
        assert!(matches!(
            classify_error(403, None, ""),
            MuninError::AuthenticationFailed
        ));
    }

    #[test]
    fn classify_other_statuses_keep_the_status() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        match classify_error(529, None, body) {
            MuninError::Api { status, message } => {
                assert_eq!(status, 529);
                assert_eq!(message, "Overloaded");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn error_message_falls_back_on_unparseable_body() {
        assert_eq!(extract_error_message("<html>nope</html>"), "provider request failed");
    }

    #[test]
    fn usage_parses_cache_tiers_with_defaults() {
        let json = r#"{"input_tokens": 10, "output_tokens": 20}"#;
        let usage: WireUsage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.cache_creation_input_tokens, 0);
        assert_eq!(usage.cache_read_input_tokens, 0);
    }
}
