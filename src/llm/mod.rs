//! Chat-completions client.
//!
//! Request/response types for an OpenAI-compatible chat-completions API plus
//! a streaming client with retry on transient provider errors. Only what the
//! interrogator loop needs — the wire protocol itself is not modelled beyond
//! that.

pub mod streaming;

pub use streaming::{ChatCompletionStream, ChatDelta, ToolCallDelta};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ReaderError, ReaderResult};
use crate::utils::constants::{LLM_BACKOFF_BASE, LLM_BACKOFF_JITTER_MS, LLM_MAX_RETRIES};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Function,
}

/// One conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Tool result keyed by the call id (native function-calling channel)
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Tool result keyed by tool name (legacy function channel, no call id)
    pub fn function(content: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    /// Approximate byte footprint used for context-window trimming
    pub fn approx_len(&self) -> usize {
        self.content.len() + 16
    }
}

/// Sampling and shaping options for one completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: None,
            top_p: None,
            top_k: None,
            stop: None,
            seed: None,
        }
    }
}

/// A tool invocation produced by the model — either from the native
/// function-call channel or parsed out of a JSON envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Streaming completion request body
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// The interrogator always streams
    pub stream: bool,
    #[serde(flatten)]
    pub options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// Whether a model exposes the native function-calling channel.
///
/// Everything else falls back to the JSON-envelope protocol taught by the
/// tool registry's system prompt.
pub fn supports_native_tools(model: &str) -> bool {
    model.starts_with("gpt-4")
        || model.starts_with("gpt-3.5-turbo")
        || model.starts_with("o1")
        || model.starts_with("o3")
}

/// Approximate context window for trimming, in tokens
pub fn context_window_tokens(model: &str) -> usize {
    if model.starts_with("gpt-4") {
        128_000
    } else if model.contains("16k") {
        16_384
    } else {
        4_096
    }
}

/// Thin chat-completions client
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Open a streaming completion, retrying transient failures
    /// (429/503/connect/timeout) with exponential backoff plus jitter.
    pub async fn stream_chat(&self, request: &ChatRequest) -> ReaderResult<ChatCompletionStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut last_err = String::new();

        for attempt in 0..=LLM_MAX_RETRIES {
            if attempt > 0 {
                let backoff = LLM_BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                let jitter =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=LLM_BACKOFF_JITTER_MS));
                tracing::warn!(
                    "llm retry: attempt {}/{} after {:?} backoff",
                    attempt + 1,
                    LLM_MAX_RETRIES + 1,
                    backoff + jitter
                );
                tokio::time::sleep(backoff + jitter).await;
            }

            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .timeout(Duration::from_secs(300))
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(ChatCompletionStream::new(resp.bytes_stream()));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if status == 429 || status == 503 {
                        last_err = format!("HTTP {status}");
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let body = crate::utils::truncate_to_char_boundary(&body, 500);
                    return Err(ReaderError::UpstreamModelFailure(format!(
                        "provider returned {status}: {body}"
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = e.to_string();
                    continue;
                }
                Err(e) => {
                    return Err(ReaderError::UpstreamModelFailure(format!(
                        "request failed: {e}"
                    )));
                }
            }
        }

        Err(ReaderError::UpstreamModelFailure(format!(
            "provider failed after {} attempts, last error: {last_err}",
            LLM_MAX_RETRIES + 1
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let m = ChatMessage::tool("result", "call_1");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));

        let m = ChatMessage::function("result", "browse");
        assert_eq!(m.role, Role::Function);
        assert_eq!(m.name.as_deref(), Some("browse"));
        assert!(m.tool_call_id.is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        let m = ChatMessage::system("x");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["role"], "system");
    }

    #[test]
    fn native_tool_support_heuristic() {
        assert!(supports_native_tools("gpt-3.5-turbo"));
        assert!(supports_native_tools("gpt-4o"));
        assert!(!supports_native_tools("mistral-7b-instruct"));
    }

    #[test]
    fn request_omits_absent_tools() {
        let req = ChatRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![ChatMessage::user("hi")],
            stream: true,
            options: ChatOptions::default(),
            tools: None,
            tool_choice: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 4096);
    }
}
