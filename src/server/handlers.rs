//! Request handlers.
//!
//! Every endpoint accepts parameters from the query string or the JSON
//! body; headers carry the scrape/format options. Streaming responses are
//! server-sent events; non-streaming failures use the `{code, message}`
//! envelope.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use super::AppState;
use crate::error::{ReaderError, ReaderResult};
use crate::formatter::{
    expand_markdown, format_snapshot_with, FormatPolicies, PromptSegment, RespondWith,
};
use crate::interrogator::{ChatEvent, ChatParams};
use crate::llm::{ChatMessage, ChatOptions, Role};
use crate::snapshot::{CookieSpec, PageResult, ScrapeOptions, Snapshot};
use crate::storage::{CrawledRecord, SNAPSHOT_PREFIX};
use crate::utils::constants::{APPROX_BYTES_PER_TOKEN, DEFAULT_MODEL, MAX_QUESTION_TOKENS};

/// System prompt for the interrogator endpoint
const INTERROGATE_SYSTEM_PROMPT: &str = "You are a web reader assistant. The user \
message starts with the extracted content of a web page, followed by a question \
about it. Answer the question using the page content. Use the available tools \
when the page content is not enough. Answer concisely, without preamble.";

// =============================================================================
// Shared parameter/header plumbing
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct InterrogateParams {
    pub url: Option<String>,
    pub model: Option<String>,
    pub question: Option<String>,
    #[serde(alias = "expandImages")]
    pub expand_images: Option<bool>,
}

impl InterrogateParams {
    fn merge(query: Self, body: Option<Self>) -> Self {
        let body = body.unwrap_or_default();
        Self {
            url: query.url.or(body.url),
            model: query.model.or(body.model),
            question: query.question.or(body.question),
            expand_images: query.expand_images.or(body.expand_images),
        }
    }
}

fn accepts_sse(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

fn validated_url(raw: &str) -> ReaderResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ReaderError::InvalidArgument(format!("bad url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ReaderError::InvalidArgument(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn scrape_options_from_headers(headers: &HeaderMap) -> ReaderResult<ScrapeOptions> {
    let mut opts = ScrapeOptions::default();

    if let Some(proxy) = headers.get("x-proxy-url").and_then(|v| v.to_str().ok()) {
        let parsed = Url::parse(proxy)
            .map_err(|e| ReaderError::InvalidArgument(format!("bad proxy url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "socks4" | "socks5") {
            return Err(ReaderError::InvalidArgument(format!(
                "unsupported proxy scheme: {}",
                parsed.scheme()
            )));
        }
        opts.proxy_url = Some(proxy.to_string());
    }

    for value in headers.get_all("x-set-cookie") {
        if let Ok(raw) = value.to_str() {
            match CookieSpec::parse(raw) {
                Some(spec) => opts.cookies.push(spec),
                None => warn!("ignoring malformed cookie header: {raw}"),
            }
        }
    }

    Ok(opts)
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
}

fn policies_from_headers(headers: &HeaderMap) -> FormatPolicies {
    FormatPolicies {
        generated_alt: header_flag(headers, "x-with-generated-alt"),
        images_summary: header_flag(headers, "x-with-images-summary"),
        links_summary: header_flag(headers, "x-with-links-summary"),
    }
}

fn respond_with_from_headers(headers: &HeaderMap) -> ReaderResult<RespondWith> {
    match headers.get("x-respond-with").and_then(|v| v.to_str().ok()) {
        None => Ok(RespondWith::Default),
        Some(raw) => RespondWith::parse(raw).ok_or_else(|| {
            ReaderError::InvalidArgument(format!("unknown x-respond-with value: {raw}"))
        }),
    }
}

fn chat_event_to_sse(event: &ChatEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event.payload())
        .unwrap_or_else(|_| Event::default().event(event.name()).data("{}"))
}

// =============================================================================
// Crawl path shared by /crawl, /interrogate and the browse tool
// =============================================================================

/// Scrape one URL to its settled snapshot, persisting it for the cruncher.
async fn crawl_settled(
    state: &AppState,
    url: Url,
    opts: ScrapeOptions,
) -> ReaderResult<PageResult> {
    let result = state.pipeline.scrape_final(url, opts).await?;
    persist_snapshot(state, &result.snapshot).await;
    Ok(result)
}

/// Store the snapshot blob and its record-store line. Failures are logged,
/// never surfaced: archiving is best-effort on the request path.
async fn persist_snapshot(state: &AppState, snapshot: &Snapshot) {
    let id = Uuid::new_v4().simple().to_string();
    let key = format!("{SNAPSHOT_PREFIX}/{id}");

    let blob = match serde_json::to_vec(snapshot) {
        Ok(blob) => blob,
        Err(e) => {
            warn!("snapshot serialization failed: {e}");
            return;
        }
    };
    if let Err(e) = state.storage.put(&key, blob, "application/json").await {
        warn!("snapshot upload failed: {e}");
        return;
    }

    let record = CrawledRecord {
        id,
        created_at: Utc::now(),
        snapshot_path: key,
    };
    if let Err(e) = state.records.append(record).await {
        warn!("record index append failed: {e}");
    }
}

/// Format a settled page, falling back from `default` to `markdown` when
/// readability came back empty, and resolving the screenshot upload.
async fn format_page(
    state: &AppState,
    mode: RespondWith,
    result: &PageResult,
    policies: FormatPolicies,
) -> ReaderResult<crate::formatter::FormattedPage> {
    let mut page = format_snapshot_with(mode, &result.snapshot, policies);
    if mode == RespondWith::Default && !page.has_content() {
        page = format_snapshot_with(RespondWith::Markdown, &result.snapshot, policies);
    }

    if mode == RespondWith::Screenshot {
        let bytes = result.screenshot.clone().ok_or_else(|| {
            ReaderError::UpstreamBrowserFailure("no screenshot captured".into())
        })?;
        let key = format!("screenshots/{}.png", Uuid::new_v4().simple());
        state.storage.put(&key, bytes, "image/png").await?;
        page.set_screenshot_url(state.storage.url_for(&key));
    }

    Ok(page)
}

// =============================================================================
// /interrogate
// =============================================================================

pub async fn interrogate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<InterrogateParams>,
    body: Option<Json<InterrogateParams>>,
) -> Response {
    let params = InterrogateParams::merge(query, body.map(|Json(b)| b));
    match interrogate_inner(&state, &headers, params).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn interrogate_inner(
    state: &AppState,
    headers: &HeaderMap,
    params: InterrogateParams,
) -> ReaderResult<Response> {
    let url = validated_url(
        params
            .url
            .as_deref()
            .ok_or_else(|| ReaderError::InvalidArgument("url is required".into()))?,
    )?;

    let question = params
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ReaderError::InvalidArgument("question is required".into()))?;
    if question.len() > MAX_QUESTION_TOKENS * APPROX_BYTES_PER_TOKEN {
        return Err(ReaderError::InvalidArgument(format!(
            "question exceeds {MAX_QUESTION_TOKENS} tokens"
        )));
    }

    let model = params
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let scrape_opts = scrape_options_from_headers(headers)?;
    let policies = policies_from_headers(headers);

    let result = crawl_settled(state, url, scrape_opts).await?;
    let page = format_page(state, RespondWith::Default, &result, policies).await?;
    let page_text = if params.expand_images.unwrap_or(false) {
        text_of_segments(expand_markdown(&page.to_string(), &HashMap::new()))
    } else {
        page.to_string()
    };

    let messages = vec![
        ChatMessage::system(INTERROGATE_SYSTEM_PROMPT),
        ChatMessage::user(format!("{page_text}\n\n{question}")),
    ];

    let chat_params = ChatParams {
        model,
        options: ChatOptions::default(),
        messages,
        max_additional_turns: 5,
        pinned_tool: None,
        use_tools: true,
    };
    let events = state.interrogator.chat(chat_params)?;

    if accepts_sse(headers) {
        let stream = events.map(|event| Ok::<_, Infallible>(chat_event_to_sse(&event)));
        return Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response());
    }

    // Plain-text path: the final turn's text is the answer
    let mut events = events;
    let mut answer = String::new();
    while let Some(event) = events.next().await {
        match event {
            ChatEvent::Chunk { text } => answer.push_str(&text),
            // A tool turn's chunks were the envelope, not the answer
            ChatEvent::Call { .. } => answer.clear(),
            ChatEvent::History { .. } => break,
            ChatEvent::Error { message } => {
                return Err(ReaderError::UpstreamModelFailure(message));
            }
            _ => {}
        }
    }
    if !answer.ends_with('\n') {
        answer.push('\n');
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        answer,
    )
        .into_response())
}

/// Text-only flattening of a prompt segment sequence: the re-appended image
/// tokens already carry the references, so links and bytes are elided.
fn text_of_segments(segments: Vec<PromptSegment>) -> String {
    let mut out = String::new();
    for segment in segments {
        if let PromptSegment::Text(text) = segment {
            out.push_str(&text);
        }
    }
    out
}

// =============================================================================
// /chat-with-reader
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatWithReaderBody {
    pub model: Option<String>,
    pub messages: Vec<WireMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub seed: Option<u64>,
    /// Accepted for wire compatibility; streaming is forced on
    pub stream: Option<bool>,
    pub functions: Option<Value>,
    pub function_call: Option<Value>,
    #[serde(alias = "maxAdditionalTurns")]
    pub max_additional_turns: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    fn into_message(self) -> ReaderResult<ChatMessage> {
        let role = match self.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "function" => Role::Function,
            other => {
                return Err(ReaderError::InvalidArgument(format!(
                    "unknown message role: {other}"
                )))
            }
        };
        Ok(ChatMessage {
            role,
            content: self.content,
            name: self.name,
            tool_call_id: self.tool_call_id,
        })
    }
}

pub async fn chat_with_reader(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<ChatWithReaderBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match chat_with_reader_inner(&state, query, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn chat_with_reader_inner(
    state: &AppState,
    query: HashMap<String, String>,
    body: ChatWithReaderBody,
) -> ReaderResult<Response> {
    let model = query
        .get("model")
        .cloned()
        .or(body.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let max_additional_turns = query
        .get("maxAdditionalTurns")
        .or_else(|| query.get("max_additional_turns"))
        .and_then(|v| v.parse().ok())
        .or(body.max_additional_turns)
        .unwrap_or(5);

    let mut messages = Vec::new();
    if let Some(system) = body.system {
        messages.push(ChatMessage::system(system));
    }
    for wire in body.messages {
        messages.push(wire.into_message()?);
    }
    if messages.is_empty() {
        return Err(ReaderError::InvalidArgument("messages are required".into()));
    }

    // `function_call` pins one tool or disables tools outright
    let (use_tools, pinned_tool) = match &body.function_call {
        Some(Value::String(s)) if s == "none" => (false, None),
        Some(Value::String(s)) if s == "auto" => (true, None),
        Some(Value::String(s)) => (true, Some(s.clone())),
        Some(Value::Object(map)) => (
            true,
            map.get("name").and_then(Value::as_str).map(str::to_string),
        ),
        _ => (true, None),
    };

    let options = ChatOptions {
        max_tokens: body.max_tokens.unwrap_or(4096),
        temperature: body.temperature,
        top_p: body.top_p,
        top_k: body.top_k,
        stop: body.stop,
        seed: body.seed,
    };

    let params = ChatParams {
        model: model.clone(),
        options,
        messages,
        max_additional_turns,
        pinned_tool,
        use_tools,
    };
    let events = state.interrogator.chat(params)?;

    // OpenAI-compatible chunk frames for text, named events for the rest
    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let created = Utc::now().timestamp();
    let stream = events
        .flat_map(move |event| {
            let frames: Vec<Event> = match &event {
                ChatEvent::Chunk { text } => {
                    let frame = json!({
                        "id": completion_id.as_str(),
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": model.as_str(),
                        "choices": [{
                            "index": 0,
                            "delta": { "content": text },
                            "finish_reason": null
                        }]
                    });
                    vec![Event::default().data(frame.to_string())]
                }
                ChatEvent::History { .. } => {
                    let finish = json!({
                        "id": completion_id.as_str(),
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": model.as_str(),
                        "choices": [{
                            "index": 0,
                            "delta": {},
                            "finish_reason": "stop"
                        }]
                    });
                    vec![
                        chat_event_to_sse(&event),
                        Event::default().data(finish.to_string()),
                        Event::default().data("[DONE]"),
                    ]
                }
                _ => vec![chat_event_to_sse(&event)],
            };
            futures::stream::iter(frames.into_iter().map(Ok::<_, Infallible>))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}

// =============================================================================
// /crawl
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CrawlParams {
    pub url: Option<String>,
}

pub async fn crawl(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CrawlParams>,
    body: Option<Json<CrawlParams>>,
) -> Response {
    let url = query
        .url
        .or_else(|| body.and_then(|Json(b)| b.url));
    match crawl_inner(&state, &headers, url).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn crawl_inner(
    state: &AppState,
    headers: &HeaderMap,
    url: Option<String>,
) -> ReaderResult<Response> {
    let url = validated_url(
        url.as_deref()
            .ok_or_else(|| ReaderError::InvalidArgument("url is required".into()))?,
    )?;

    let mode = respond_with_from_headers(headers)?;
    let policies = policies_from_headers(headers);
    let scrape_opts = scrape_options_from_headers(headers)?;
    // X-No-Cache is honored implicitly: every request drives a live load

    let result = crawl_settled(state, url, scrape_opts).await?;
    let page = format_page(state, mode, &result, policies).await?;

    if accepts_sse(headers) {
        // Progressive crawling is a single-page stream of the final result
        let event = Event::default()
            .event("page")
            .json_data(&page)
            .unwrap_or_else(|_| Event::default().event("page").data("{}"));
        let stream = futures::stream::iter([Ok::<_, Infallible>(event)]);
        return Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response());
    }

    let content_type = match mode {
        RespondWith::Html => "text/html; charset=utf-8",
        _ => "text/plain; charset=utf-8",
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        page.to_string(),
    )
        .into_response())
}

// =============================================================================
// /crunch
// =============================================================================

pub async fn crunch(State(state): State<AppState>) -> Response {
    let (tx, rx) = mpsc::channel(16);
    let cruncher = state.cruncher.clone();
    let timeout = state.config.crunch.http_timeout;

    tokio::spawn(async move {
        match tokio::time::timeout(timeout, cruncher.crunch(Some(tx))).await {
            Ok(Ok(files)) => tracing::info!("crunch produced {} archives", files.len()),
            Ok(Err(e)) => tracing::error!("crunch failed: {e}"),
            Err(_) => tracing::error!("crunch timed out after {}s", timeout.as_secs()),
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let sse = match &event {
            crate::cruncher::CrunchEvent::Started { .. } => Event::default().event("start"),
            crate::cruncher::CrunchEvent::File { .. } => Event::default(),
            crate::cruncher::CrunchEvent::Finished { .. } => Event::default().event("end"),
        };
        Ok::<_, Infallible>(
            sse.json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}")),
        )
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// =============================================================================
// /healthz
// =============================================================================

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pool_max": state.pool.max_contexts(),
        "pool_free": state.pool.available_slots(),
    }))
}
