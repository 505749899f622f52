//! Shared configuration constants for pagereader
//!
//! Default values used throughout the codebase to ensure consistency and
//! avoid magic numbers.

use std::time::Duration;

/// Chrome user agent string presented by every pooled context
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
/// Next update: 2025-04-29 (quarterly schedule)
///
/// Reference: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Viewport applied to every page vended by the pool
pub const VIEWPORT_WIDTH: u32 = 1920;
pub const VIEWPORT_HEIGHT: u32 = 1080;

/// Hard navigation timeout per scrape
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Debounce applied in-page before reporting an empty readability parse
pub const EMPTY_PARSE_DEBOUNCE_MS: u64 = 500;

/// Default model when the caller does not pick one
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Upper bound on `max_additional_turns` for the interrogator loop
pub const MAX_ADDITIONAL_TURNS_CAP: u32 = 50;

/// Question length cap for /interrogate, in GPT tokens
pub const MAX_QUESTION_TOKENS: usize = 2048;

/// Approximate bytes per GPT token, used wherever a token budget appears
pub const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Cruncher batch size per object-storage file
pub const CRUNCH_BATCH_SIZE: usize = 10_000;

/// Cruncher in-flight snapshot fetch bound
pub const CRUNCH_MAX_IN_FLIGHT: usize = 100;

/// How many days back the cruncher reaches by default
pub const CRUNCH_T_MINUS_DAYS: i64 = 31;

/// Maximum results returned by the `search_web` tool
pub const SEARCH_MAX_RESULTS: usize = 10;

/// Polling interval while waiting on search-result DOM elements
///
/// 100ms provides good responsiveness without excessive CDP overhead.
pub const SEARCH_POLL_INTERVAL_MS: u64 = 100;

/// Retry budget for transient LLM API errors (429, 503, timeout)
pub const LLM_MAX_RETRIES: u32 = 3;

/// Base delay for LLM retry backoff (doubles each attempt: 1s, 2s, 4s)
pub const LLM_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum random jitter added to each backoff delay
pub const LLM_BACKOFF_JITTER_MS: u64 = 500;
