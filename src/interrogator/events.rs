//! Event vocabulary of the interrogator loop.
//!
//! Within one turn events are serialised in the order
//! `(chunk|n1|n2|snapshot)* structured? (call return)* injectHistory*`,
//! and the loop terminates with either `history` or `error`.

use serde_json::{json, Value};

use crate::llm::{ChatMessage, ToolCall};

/// One event on the chat stream
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Raw text delta from the model
    Chunk { text: String },
    /// First top-level `{` in the model output; payload is the preamble
    N1 { preamble: String },
    /// Second top-level object opened
    N2,
    /// Incremental partial JSON
    Snapshot { value: Value },
    /// Final parsed JSON of the turn
    Structured { value: Value },
    /// Tool invocation beginning
    Call { call: ToolCall },
    /// Tool result
    Return {
        id: String,
        name: String,
        result: String,
    },
    /// Message appended to the running history
    InjectHistory { message: ChatMessage },
    /// Final history, emitted on the last turn
    History { messages: Vec<ChatMessage> },
    /// Terminal failure; the stream ends after this
    Error { message: String },
}

impl ChatEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::N1 { .. } => "n1",
            Self::N2 => "n2",
            Self::Snapshot { .. } => "snapshot",
            Self::Structured { .. } => "structured",
            Self::Call { .. } => "call",
            Self::Return { .. } => "return",
            Self::InjectHistory { .. } => "injectHistory",
            Self::History { .. } => "history",
            Self::Error { .. } => "error",
        }
    }

    /// SSE data payload
    pub fn payload(&self) -> Value {
        match self {
            Self::Chunk { text } => json!({ "text": text }),
            Self::N1 { preamble } => json!({ "preamble": preamble }),
            Self::N2 => json!({}),
            Self::Snapshot { value } | Self::Structured { value } => value.clone(),
            Self::Call { call } => json!({
                "id": call.id,
                "name": call.name,
                "arguments": call.arguments,
            }),
            Self::Return { id, name, result } => json!({
                "id": id,
                "name": name,
                "result": result,
            }),
            Self::InjectHistory { message } => {
                serde_json::to_value(message).unwrap_or_default()
            }
            Self::History { messages } => {
                serde_json::to_value(messages).unwrap_or_default()
            }
            Self::Error { message } => json!({ "message": message }),
        }
    }
}
