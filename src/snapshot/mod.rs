//! Progressive snapshot pipeline.
//!
//! Drives one page load inside a pooled context and streams readability
//! snapshots (with screenshots) to the caller until the load settles. The
//! stream is pull-based: the driver suspends on a capacity-1 channel until
//! the consumer asks for the next item, and it is not restartable.

pub mod scripts;
pub mod types;

pub use types::{CookieSpec, PageResult, ScrapeOptions, Snapshot};

use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventBindingCalled;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use url::Url;

use crate::browser_pool::{BrowserPool, PooledContext};
use crate::error::{ReaderError, ReaderResult};
use crate::utils::constants::NAVIGATION_TIMEOUT;

use scripts::{EXTRACT_SCRIPT, SNAPSHOT_BINDING};

/// The snapshot pipeline over the shared pool
#[derive(Clone)]
pub struct SnapshotPipeline {
    pool: Arc<BrowserPool>,
}

impl SnapshotPipeline {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self { pool }
    }

    /// Drive one load and stream its PageResults.
    ///
    /// Every successful navigation yields at least one item; the last item
    /// is always the post-settle re-parse. Consumer disconnect stops the
    /// driver at its next yield.
    pub async fn scrape(
        &self,
        url: Url,
        opts: ScrapeOptions,
    ) -> ReaderResult<ReceiverStream<ReaderResult<PageResult>>> {
        let ctx = self.pool.acquire_with(opts.proxy_url.clone()).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(drive_load(ctx, url, opts, tx));

        Ok(ReceiverStream::new(rx))
    }

    /// Convenience for callers that only need the settled page: drains the
    /// stream and returns the final PageResult.
    pub async fn scrape_final(&self, url: Url, opts: ScrapeOptions) -> ReaderResult<PageResult> {
        let mut stream = self.scrape(url, opts).await?;
        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item?);
        }
        last.ok_or_else(|| {
            ReaderError::UpstreamBrowserFailure("navigation produced no snapshot".into())
        })
    }
}

async fn drive_load(
    ctx: PooledContext,
    url: Url,
    opts: ScrapeOptions,
    tx: mpsc::Sender<ReaderResult<PageResult>>,
) {
    let page = ctx.page().clone();
    let outcome = run_pipeline(&page, &url, &opts, &tx).await;

    if let Err(err) = outcome {
        // Consumer may be gone already; a failed send is fine
        let _ = tx.send(Err(err)).await;
    }

    ctx.dispose().await;
}

async fn run_pipeline(
    page: &Page,
    url: &Url,
    opts: &ScrapeOptions,
    tx: &mpsc::Sender<ReaderResult<PageResult>>,
) -> ReaderResult<()> {
    install_cookies(page, url, &opts.cookies).await;

    let mut binding_events = page
        .event_listener::<EventBindingCalled>()
        .await
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("binding listener: {e}")))?;

    let nav = {
        let page = page.clone();
        let url = url.to_string();
        async move {
            page.goto(url)
                .await
                .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("navigation: {e}")))?;
            page.wait_for_navigation().await.map_err(|e| {
                ReaderError::UpstreamBrowserFailure(format!("navigation settle: {e}"))
            })?;
            Ok::<(), ReaderError>(())
        }
    };
    tokio::pin!(nav);

    let deadline = tokio::time::sleep(NAVIGATION_TIMEOUT);
    tokio::pin!(deadline);

    let mut last: Option<Snapshot> = None;

    // Race progressive snapshots against navigation settling. Each yield
    // suspends here until the consumer polls the stream again.
    loop {
        tokio::select! {
            result = &mut nav => {
                result?;
                break;
            }
            _ = &mut deadline => {
                return Err(ReaderError::UpstreamBrowserFailure(format!(
                    "navigation timed out after {}s",
                    NAVIGATION_TIMEOUT.as_secs()
                )));
            }
            event = binding_events.next() => {
                let Some(event) = event else { break };
                if event.name != SNAPSHOT_BINDING {
                    continue;
                }
                let snapshot = match serde_json::from_str::<Snapshot>(&event.payload) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("unparseable snapshot payload: {e}");
                        continue;
                    }
                };
                // Duplicate reports are suppressed
                if last.as_ref() == Some(&snapshot) {
                    continue;
                }
                last = Some(snapshot.clone());
                let screenshot = take_screenshot(page).await;
                let result = PageResult {
                    url: url.to_string(),
                    snapshot,
                    screenshot,
                };
                if tx.send(Ok(result)).await.is_err() {
                    // Consumer disconnected; abandon the load
                    return Ok(());
                }
            }
        }
    }

    // Post-settle: one last synchronous parse is always the final item
    let snapshot = final_parse(page).await?;
    let screenshot = take_screenshot(page).await;
    let _ = tx
        .send(Ok(PageResult {
            url: url.to_string(),
            snapshot,
            screenshot,
        }))
        .await;
    Ok(())
}

async fn install_cookies(page: &Page, url: &Url, cookies: &[CookieSpec]) {
    for spec in cookies {
        let mut builder = CookieParam::builder().name(&spec.name).value(&spec.value);
        builder = match &spec.domain {
            Some(domain) => builder.domain(domain.clone()),
            None => builder.url(url.to_string()),
        };
        if let Some(path) = &spec.path {
            builder = builder.path(path.clone());
        }
        match builder.build() {
            Ok(param) => {
                if let Err(e) = page.set_cookie(param).await {
                    warn!("failed to set cookie {}: {e}", spec.name);
                }
            }
            Err(e) => warn!("failed to build cookie {}: {e}", spec.name),
        }
    }
}

async fn final_parse(page: &Page) -> ReaderResult<Snapshot> {
    let js_result = page
        .evaluate(EXTRACT_SCRIPT)
        .await
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("final parse: {e}")))?;
    let value = js_result
        .into_value::<serde_json::Value>()
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("final parse value: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("final parse shape: {e}")))
}

async fn take_screenshot(page: &Page) -> Option<Vec<u8>> {
    let params = CaptureScreenshotParams {
        format: Some(CaptureScreenshotFormat::Png),
        ..Default::default()
    };
    match page.screenshot(params).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("screenshot failed: {e}");
            None
        }
    }
}
