//! SSE streaming parser for chat completions.
//!
//! Converts a raw `reqwest` byte stream into typed deltas. Handles
//! `data: [DONE]`, partial lines, buffering, and incremental tool-call
//! fragments on the native function-calling channel.

use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::ReaderError;

/// One parsed event from the completion stream
#[derive(Debug, Clone, Default)]
pub struct ChatDelta {
    /// Text delta for this chunk (may be empty)
    pub content: String,
    /// Tool-call fragments carried by this chunk
    pub tool_calls: Vec<ToolCallDelta>,
    /// Whether the stream is done
    pub done: bool,
}

/// Incremental fragment of a native tool call.
///
/// The provider streams the id and name once, then the argument JSON in
/// pieces; fragments sharing an `index` belong to the same call.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunkRaw {
    choices: Vec<StreamChoiceRaw>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoiceRaw {
    delta: DeltaRaw,
}

#[derive(Debug, serde::Deserialize)]
struct DeltaRaw {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRaw>,
}

#[derive(Debug, serde::Deserialize)]
struct ToolCallRaw {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: FunctionRaw,
}

#[derive(Debug, Default, serde::Deserialize)]
struct FunctionRaw {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Stream adapter over the provider's SSE bytes
pub struct ChatCompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
}

impl ChatCompletionStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: String::new(),
        }
    }
}

impl Stream for ChatCompletionStream {
    type Item = Result<ChatDelta, ReaderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(chunk) = try_parse_line(&mut this.buffer) {
                return Poll::Ready(Some(chunk));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ReaderError::UpstreamModelFailure(format!(
                        "stream aborted: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    if this.buffer.trim().is_empty() {
                        return Poll::Ready(None);
                    }
                    if let Some(chunk) = try_parse_line(&mut this.buffer) {
                        return Poll::Ready(Some(chunk));
                    }
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Extract and parse one complete SSE line from the buffer.
/// Returns `None` if no complete line is available yet.
fn try_parse_line(buffer: &mut String) -> Option<Result<ChatDelta, ReaderError>> {
    loop {
        let newline_pos = buffer.find('\n')?;
        let line = buffer[..newline_pos].trim().to_string();
        buffer.drain(..=newline_pos);

        // SSE uses blank lines as event separators
        if line.is_empty() {
            continue;
        }

        if let Some(data) = line.strip_prefix("data: ") {
            let data = data.trim();

            if data == "[DONE]" {
                return Some(Ok(ChatDelta {
                    done: true,
                    ..Default::default()
                }));
            }

            match serde_json::from_str::<StreamChunkRaw>(data) {
                Ok(raw) => {
                    let Some(choice) = raw.choices.into_iter().next() else {
                        continue;
                    };
                    let tool_calls = choice
                        .delta
                        .tool_calls
                        .into_iter()
                        .map(|tc| ToolCallDelta {
                            index: tc.index,
                            id: tc.id,
                            name: tc.function.name,
                            arguments: tc.function.arguments.unwrap_or_default(),
                        })
                        .collect();
                    return Some(Ok(ChatDelta {
                        content: choice.delta.content.unwrap_or_default(),
                        tool_calls,
                        done: false,
                    }));
                }
                Err(e) => {
                    return Some(Err(ReaderError::UpstreamModelFailure(format!(
                        "bad stream chunk: {e} (data: {})",
                        crate::utils::truncate_to_char_boundary(data, 200)
                    ))));
                }
            }
        }

        // Skip non-data lines ("event:", "id:", "retry:")
    }
}
