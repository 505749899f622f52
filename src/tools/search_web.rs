//! `search_web` tool: browser-driven DuckDuckGo search.
//!
//! Drives a pooled context to the DuckDuckGo results page and extracts
//! result entries from the rendered DOM. DuckDuckGo renders results with
//! React, so after navigation we poll for the result selector before
//! extracting.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use super::{AnyhowError, Tool};
use crate::browser_pool::BrowserPool;
use crate::utils::constants::{SEARCH_MAX_RESULTS, SEARCH_POLL_INTERVAL_MS};

/// DuckDuckGo search URL base
const SEARCH_URL: &str = "https://duckduckgo.com";

/// CSS selector for individual search results
/// DuckDuckGo uses article elements with data-testid="result"
const SEARCH_RESULT_SELECTOR: &str = "article[data-testid='result']";

/// How long to wait for React to render results after navigation
const RESULTS_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts `{url, title, description}` from each rendered result.
/// Title and URL share the `h2 > a` element; snippets live in
/// `div[data-result='snippet']`.
const EXTRACT_RESULTS_SCRIPT: &str = r#"
(() => {
    const results = [];
    document.querySelectorAll("article[data-testid='result']").forEach(article => {
        const link = article.querySelector('h2 > a');
        if (!link || !link.href) return;
        const snippet = article.querySelector("div[data-result='snippet']");
        results.push({
            url: link.href,
            title: link.textContent.trim(),
            description: snippet ? snippet.textContent.trim() : ''
        });
    });
    return results;
})()
"#;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchWebArgs {
    /// Search query text
    pub text: String,
}

/// One search result entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub description: String,
}

pub struct SearchWebTool {
    pool: Arc<BrowserPool>,
}

impl SearchWebTool {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for SearchWebTool {
    const NAME: &'static str = "search_web";
    type Args = SearchWebArgs;
    type Output = Vec<SearchHit>;
    type Error = AnyhowError;

    fn description(&self) -> &str {
        "Search the web and return result entries with url, title and description. \
         Use this to find pages when you do not already know the URL."
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.call_inner(args).await.map_err(AnyhowError)
    }
}

impl SearchWebTool {
    async fn call_inner(&self, args: SearchWebArgs) -> anyhow::Result<Vec<SearchHit>> {
        let query = args.text.trim();
        if query.is_empty() {
            anyhow::bail!("empty search query");
        }

        let ctx = self.pool.acquire().await?;
        let page = ctx.page().clone();

        let result = async {
            let mut search_url = Url::parse(SEARCH_URL)?;
            search_url
                .query_pairs_mut()
                .append_pair("q", query)
                .append_pair("ia", "web");

            page.goto(search_url.as_str()).await?;
            page.wait_for_navigation().await?;

            // Poll for rendered results instead of a fixed delay
            let start = Instant::now();
            loop {
                if page.find_element(SEARCH_RESULT_SELECTOR).await.is_ok() {
                    debug!(
                        "search results appeared after {:.2}s",
                        start.elapsed().as_secs_f64()
                    );
                    break;
                }
                if start.elapsed() >= RESULTS_WAIT_TIMEOUT {
                    let url = page.url().await.ok().flatten().unwrap_or_default();
                    if url.contains("captcha") || url.contains("/sorry/") {
                        anyhow::bail!("search engine presented a CAPTCHA page");
                    }
                    anyhow::bail!(
                        "timeout waiting for search results to render ({}s)",
                        RESULTS_WAIT_TIMEOUT.as_secs()
                    );
                }
                tokio::time::sleep(Duration::from_millis(SEARCH_POLL_INTERVAL_MS)).await;
            }

            let js_result = page.evaluate(EXTRACT_RESULTS_SCRIPT).await?;
            let value = js_result
                .into_value::<serde_json::Value>()
                .map_err(|e| anyhow::anyhow!("failed to read search results: {e}"))?;
            let mut hits: Vec<SearchHit> = serde_json::from_value(value)?;
            hits.truncate(SEARCH_MAX_RESULTS);
            Ok(hits)
        }
        .await;

        ctx.dispose().await;
        result
    }
}
