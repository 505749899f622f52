//! Multi-turn streaming LLM driver.
//!
//! Each turn streams one completion, fanning the text into the outbound
//! event channel and (when the model lacks native function calling) into
//! the incremental JSON parser. A `USE_TOOLS` envelope or native tool-call
//! deltas dispatch registry tools; their results are appended to the
//! conversation tail and the loop re-enters until a turn calls no tool or
//! the turn budget runs out.

pub mod events;

pub use events::ChatEvent;

use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReaderError, ReaderResult};
use crate::jsonstream::{parse_lenient, IncrementalJsonStream, JsonStreamEvent, JsonStreamOptions};
use crate::llm::{
    context_window_tokens, supports_native_tools, ChatMessage, ChatOptions, ChatRequest, LlmClient,
    ToolCall, ToolCallDelta,
};
use crate::tools::ToolRegistry;
use crate::utils::constants::{APPROX_BYTES_PER_TOKEN, MAX_ADDITIONAL_TURNS_CAP};

/// Parameters for one chat session
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub options: ChatOptions,
    /// Conversation prefix (system + user messages)
    pub messages: Vec<ChatMessage>,
    /// Extra turns allowed for tool use, validated 0..=50
    pub max_additional_turns: u32,
    /// Force the model to invoke this tool (`function_call` pin)
    pub pinned_tool: Option<String>,
    /// Whether tools are offered at all
    pub use_tools: bool,
}

/// The interrogator loop over a shared tool registry
#[derive(Clone)]
pub struct InterrogatorLoop {
    llm: LlmClient,
    registry: Arc<ToolRegistry>,
}

impl InterrogatorLoop {
    pub fn new(llm: LlmClient, registry: Arc<ToolRegistry>) -> Self {
        Self { llm, registry }
    }

    /// Start a chat session and stream its events.
    ///
    /// Event ordering per turn:
    /// `(chunk|n1|n2|snapshot)* structured? (call return injectHistory)*`;
    /// the session terminates with `history` or `error`.
    pub fn chat(&self, params: ChatParams) -> ReaderResult<ReceiverStream<ChatEvent>> {
        if params.max_additional_turns > MAX_ADDITIONAL_TURNS_CAP {
            return Err(ReaderError::InvalidArgument(format!(
                "max_additional_turns must be 0..={MAX_ADDITIONAL_TURNS_CAP}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let driver = self.clone();
        tokio::spawn(async move {
            driver.run(params, tx).await;
        });
        Ok(ReceiverStream::new(rx))
    }

    async fn run(&self, params: ChatParams, tx: mpsc::Sender<ChatEvent>) {
        let base_messages = params.messages.clone();
        let mut tail: Vec<ChatMessage> = Vec::new();

        // One base turn plus the additional tool turns
        let total_turns = params.max_additional_turns as u64 + 1;

        for turn in 0..total_turns {
            let turns_remaining = total_turns - turn;
            // The last turn gets no tools: there would be no turn left to
            // consume their results
            let attach_tools =
                params.use_tools && !self.registry.is_empty() && turns_remaining > 1;
            let software_fc = attach_tools && !supports_native_tools(&params.model);

            let outcome = self
                .run_turn(&params, &base_messages, &mut tail, attach_tools, software_fc, &tx)
                .await;

            match outcome {
                Ok(true) => continue, // tools were called; next turn
                Ok(false) => {
                    let mut messages = base_messages.clone();
                    messages.extend(tail);
                    let _ = tx.send(ChatEvent::History { messages }).await;
                    return;
                }
                Err(err) => {
                    warn!("chat turn failed: {err}");
                    let _ = tx
                        .send(ChatEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }

        // Turn budget exhausted: a normal terminal
        let mut messages = base_messages;
        messages.extend(tail);
        let _ = tx.send(ChatEvent::History { messages }).await;
    }

    /// Returns Ok(true) when the turn dispatched at least one tool call.
    async fn run_turn(
        &self,
        params: &ChatParams,
        base_messages: &[ChatMessage],
        tail: &mut Vec<ChatMessage>,
        attach_tools: bool,
        software_fc: bool,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> ReaderResult<bool> {
        // Compose this turn's message window
        let window = context_window_tokens(&params.model);
        let budget_tokens = window.saturating_sub(params.options.max_tokens as usize);
        let mut messages = trim_messages(base_messages, budget_tokens);
        if software_fc {
            let teaching = self
                .registry
                .teaching_prompt(params.pinned_tool.as_deref());
            messages.insert(0, ChatMessage::system(teaching));
        }
        messages.extend(tail.iter().cloned());

        let request = ChatRequest {
            model: params.model.clone(),
            messages,
            stream: true,
            options: params.options.clone(),
            tools: (attach_tools && !software_fc).then(|| self.registry.openai_tools()),
            tool_choice: match (&params.pinned_tool, attach_tools && !software_fc) {
                (Some(name), true) => Some(serde_json::json!({
                    "type": "function",
                    "function": { "name": name }
                })),
                _ => None,
            },
        };

        let mut stream = self.llm.stream_chat(&request).await?;

        let json_opts = JsonStreamOptions::default();
        let mut parser = software_fc.then(|| IncrementalJsonStream::new(json_opts.clone()));
        let mut assistant_text = String::new();
        let mut native_calls: BTreeMap<usize, PendingCall> = BTreeMap::new();

        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if delta.done {
                break;
            }

            if !delta.content.is_empty() {
                assistant_text.push_str(&delta.content);
                if tx
                    .send(ChatEvent::Chunk {
                        text: delta.content.clone(),
                    })
                    .await
                    .is_err()
                {
                    // Client gone; stop the whole loop quietly
                    return Ok(false);
                }
                if let Some(parser) = parser.as_mut() {
                    for event in parser.feed(&delta.content) {
                        forward_parse_event(event, tx).await;
                    }
                }
            }

            for fragment in delta.tool_calls {
                accumulate_native_call(&mut native_calls, fragment);
            }
        }

        // End of stream: resolve the turn's tool calls
        let mut calls: Vec<ToolCall> = Vec::new();

        if let Some(mut parser) = parser.take() {
            for event in parser.finish() {
                if let JsonStreamEvent::Final(value) = event {
                    let _ = tx
                        .send(ChatEvent::Structured {
                            value: value.clone(),
                        })
                        .await;
                    if let Some(envelope_calls) = parse_envelope(&value) {
                        // Record the assistant's envelope so the next turn
                        // sees its own tool request
                        tail.push(ChatMessage::assistant(value.to_string()));
                        calls.extend(envelope_calls);
                    }
                } else {
                    forward_parse_event(event, tx).await;
                }
            }
        }

        // Native-channel calls are already recorded by the provider; no
        // assistant-JSON push needed
        for (_, pending) in native_calls {
            if let Some(call) = pending.finish(&json_opts) {
                calls.push(call);
            }
        }

        if calls.is_empty() {
            if !assistant_text.is_empty() {
                tail.push(ChatMessage::assistant(assistant_text));
            }
            return Ok(false);
        }

        for call in calls {
            let _ = tx.send(ChatEvent::Call { call: call.clone() }).await;

            // Tool failures become output the model can read, never loop
            // errors
            let result = match self.registry.dispatch(&call.name, &call.arguments).await {
                Ok(output) => output,
                Err(err) => format!("TOOL_ERROR: {err}"),
            };

            let _ = tx
                .send(ChatEvent::Return {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                })
                .await;

            let message = if call.id.is_empty() {
                ChatMessage::function(result, call.name.clone())
            } else {
                ChatMessage::tool(result, call.id.clone())
            };
            tail.push(message.clone());
            let _ = tx.send(ChatEvent::InjectHistory { message }).await;
        }

        Ok(true)
    }
}

async fn forward_parse_event(event: JsonStreamEvent, tx: &mpsc::Sender<ChatEvent>) {
    let mapped = match event {
        JsonStreamEvent::N1 { preamble } => ChatEvent::N1 { preamble },
        JsonStreamEvent::N2 => ChatEvent::N2,
        JsonStreamEvent::Snapshot(value) => ChatEvent::Snapshot { value },
        JsonStreamEvent::Final(_) => return,
    };
    let _ = tx.send(mapped).await;
}

/// Extract tool calls from a `USE_TOOLS` envelope
fn parse_envelope(value: &Value) -> Option<Vec<ToolCall>> {
    if value.get("intention")?.as_str()? != "USE_TOOLS" {
        return None;
    }
    let tools = value.get("tools")?.as_array()?;
    let calls = tools
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let arguments = entry.get("arguments").cloned().unwrap_or(Value::Null);
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("tool_{}", Uuid::new_v4().simple()));
            Some(ToolCall {
                id,
                name,
                arguments,
            })
        })
        .collect::<Vec<_>>();
    Some(calls)
}

/// Native tool-call fragments accumulated by stream index
#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

fn accumulate_native_call(calls: &mut BTreeMap<usize, PendingCall>, fragment: ToolCallDelta) {
    let pending = calls.entry(fragment.index).or_default();
    if fragment.id.is_some() {
        pending.id = fragment.id;
    }
    if fragment.name.is_some() {
        pending.name = fragment.name;
    }
    pending.arguments.push_str(&fragment.arguments);
}

impl PendingCall {
    fn finish(self, opts: &JsonStreamOptions) -> Option<ToolCall> {
        let name = self.name?;
        // Same lenient dialect as the envelope parser
        let arguments = if self.arguments.trim().is_empty() {
            Value::Null
        } else {
            parse_lenient(&self.arguments, opts).unwrap_or_else(|| {
                debug!("unparseable tool arguments for {name}");
                Value::Null
            })
        };
        Some(ToolCall {
            id: self
                .id
                .unwrap_or_else(|| format!("tool_{}", Uuid::new_v4().simple())),
            name,
            arguments,
        })
    }
}

/// Trim oldest messages until the window fits the token budget.
///
/// Leading system messages are always kept; the tail of the conversation is
/// never dropped.
fn trim_messages(messages: &[ChatMessage], budget_tokens: usize) -> Vec<ChatMessage> {
    let budget_bytes = budget_tokens.saturating_mul(APPROX_BYTES_PER_TOKEN);
    let system_count = messages
        .iter()
        .take_while(|m| matches!(m.role, crate::llm::Role::System))
        .count();

    let system_bytes: usize = messages[..system_count]
        .iter()
        .map(ChatMessage::approx_len)
        .sum();
    let mut rest: Vec<&ChatMessage> = messages[system_count..].iter().collect();
    let mut rest_bytes: usize = rest.iter().map(|m| m.approx_len()).sum();

    while rest.len() > 1 && system_bytes + rest_bytes > budget_bytes {
        let dropped = rest.remove(0);
        rest_bytes -= dropped.approx_len();
    }

    messages[..system_count]
        .iter()
        .chain(rest)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_parse_extracts_calls() {
        let value = json!({
            "intention": "USE_TOOLS",
            "thoughts": "x",
            "tools": [
                {"name": "browse", "arguments": {"url": "https://a.test"}, "id": "T1"}
            ]
        });
        let calls = parse_envelope(&value).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "browse");
        assert_eq!(calls[0].id, "T1");
        assert_eq!(calls[0].arguments["url"], "https://a.test");
    }

    #[test]
    fn envelope_parse_rejects_other_intentions() {
        assert!(parse_envelope(&json!({"intention": "ANSWER", "tools": []})).is_none());
        assert!(parse_envelope(&json!({"answer": 42})).is_none());
    }

    #[test]
    fn envelope_parse_generates_missing_ids() {
        let value = json!({
            "intention": "USE_TOOLS",
            "tools": [{"name": "search_web", "arguments": {"text": "q"}}]
        });
        let calls = parse_envelope(&value).unwrap();
        assert!(calls[0].id.starts_with("tool_"));
    }

    #[test]
    fn native_fragments_accumulate_by_index() {
        let mut calls = BTreeMap::new();
        accumulate_native_call(
            &mut calls,
            ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("browse".into()),
                arguments: "{\"url\":".into(),
            },
        );
        accumulate_native_call(
            &mut calls,
            ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "\"https://a.test\"}".into(),
            },
        );
        let call = calls
            .remove(&0)
            .unwrap()
            .finish(&JsonStreamOptions::default())
            .unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments["url"], "https://a.test");
    }

    #[test]
    fn trim_keeps_system_and_tail() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("a".repeat(400)),
            ChatMessage::user("b".repeat(400)),
            ChatMessage::user("question"),
        ];
        // Budget fits the system message and roughly one more message
        let trimmed = trim_messages(&messages, 120);
        assert!(matches!(trimmed[0].role, crate::llm::Role::System));
        assert_eq!(trimmed.last().unwrap().content, "question");
        assert!(trimmed.len() < messages.len());
    }

    #[test]
    fn trim_noop_when_budget_fits() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let trimmed = trim_messages(&messages, 10_000);
        assert_eq!(trimmed.len(), 2);
    }
}
