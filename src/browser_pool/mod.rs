//! Bounded vendor of single-use browser contexts.
//!
//! One headless Chromium process is shared by every request; each `acquire`
//! creates a fresh isolated browser context (no cookie/storage bleed between
//! requests) with a page pre-configured for snapshot reporting. Contexts are
//! destroyed on release, never reused.
//!
//! Admission is a counting semaphore sized `1 + ⌊free GiB⌋` measured once at
//! startup. If the browser process disconnects the pool turns `crippled`;
//! the next `acquire` relaunches it once, and a failed relaunch surfaces as
//! an upstream browser failure.

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::AddBindingParams;
use chromiumoxide::Page;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser_setup::launch_browser;
use crate::error::{ReaderError, ReaderResult};
use crate::snapshot::scripts::{INIT_SCRIPT, SNAPSHOT_BINDING};

/// Pool sizing and launch options
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub headless: bool,
    /// Maximum concurrently-live contexts
    pub max_contexts: usize,
}

impl PoolConfig {
    /// Derive the context bound from free memory at startup:
    /// `1 + ⌊free GiB⌋`, at least 1. A non-zero `override_size` wins.
    pub fn detect(headless: bool, override_size: usize) -> Self {
        let max_contexts = if override_size > 0 {
            override_size
        } else {
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            let free_gib = (sys.available_memory() / (1024 * 1024 * 1024)) as usize;
            1 + free_gib
        };
        info!("browser pool sized at {max_contexts} contexts");
        Self {
            headless,
            max_contexts: max_contexts.max(1),
        }
    }
}

struct SharedBrowser {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl SharedBrowser {
    fn teardown(self) {
        self.handler.abort();
        let dir = self.user_data_dir;
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!("failed to clean up profile dir {}: {e}", dir.display());
        }
    }
}

/// The process-wide browser pool
pub struct BrowserPool {
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    browser: Mutex<Option<SharedBrowser>>,
    crippled: AtomicBool,
}

impl BrowserPool {
    /// Launch the underlying browser and build the pool.
    /// A launch failure here is fatal to the service.
    pub async fn launch(config: PoolConfig) -> ReaderResult<Arc<Self>> {
        let shared = Self::launch_shared(&config).await?;
        Ok(Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_contexts)),
            config,
            browser: Mutex::new(Some(shared)),
            crippled: AtomicBool::new(false),
        }))
    }

    async fn launch_shared(config: &PoolConfig) -> ReaderResult<SharedBrowser> {
        let (browser, handler, user_data_dir) = launch_browser(config.headless, None, None)
            .await
            .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("launch failed: {e:#}")))?;
        Ok(SharedBrowser {
            browser: Arc::new(browser),
            handler,
            user_data_dir,
        })
    }

    pub fn max_contexts(&self) -> usize {
        self.config.max_contexts
    }

    /// Currently-free context slots (used by tests and health reporting)
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Mark the underlying browser as gone; the next acquire relaunches.
    pub fn mark_crippled(&self) {
        self.crippled.store(true, Ordering::Release);
    }

    /// Acquire a fresh isolated context. Suspends while the pool is at its
    /// bound; the permit travels with the returned guard.
    pub async fn acquire(self: &Arc<Self>) -> ReaderResult<PooledContext> {
        self.acquire_with(None).await
    }

    /// Like [`acquire`](Self::acquire), routing the context's traffic
    /// through an upstream proxy (`X-Proxy-Url`).
    pub async fn acquire_with(
        self: &Arc<Self>,
        proxy_server: Option<String>,
    ) -> ReaderResult<PooledContext> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore never closed");

        let browser = self.healthy_browser().await?;

        let mut ctx_params = CreateBrowserContextParams::default();
        ctx_params.proxy_server = proxy_server;
        let ctx_id = match browser.execute(ctx_params).await {
            Ok(response) => response.result.browser_context_id,
            Err(e) => {
                self.mark_crippled();
                return Err(ReaderError::UpstreamBrowserFailure(format!(
                    "create context: {e}"
                )));
            }
        };

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(ctx_id.clone())
            .build()
            .map_err(|e| ReaderError::Internal(format!("target params: {e}")))?;

        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&browser, ctx_id).await;
                return Err(ReaderError::UpstreamBrowserFailure(format!(
                    "create page: {e}"
                )));
            }
        };

        if let Err(e) = configure_page(&page).await {
            dispose_context(&browser, ctx_id).await;
            return Err(e);
        }

        debug!("vended fresh browser context");
        Ok(PooledContext {
            page: Some(page),
            ctx_id: Some(ctx_id),
            browser,
            _permit: permit,
        })
    }

    /// Return a connected browser handle, relaunching once if the process
    /// disconnected. A failed relaunch is the second consecutive failure
    /// and surfaces to the caller.
    async fn healthy_browser(&self) -> ReaderResult<Arc<Browser>> {
        let mut slot = self.browser.lock().await;

        if !self.crippled.load(Ordering::Acquire) {
            if let Some(shared) = slot.as_ref() {
                match shared.browser.version().await {
                    Ok(_) => return Ok(shared.browser.clone()),
                    Err(e) => {
                        warn!("browser failed health check: {e}");
                        self.crippled.store(true, Ordering::Release);
                    }
                }
            }
        }

        // Crippled (or never launched): single relaunch attempt
        if let Some(old) = slot.take() {
            old.teardown();
        }
        info!("relaunching browser after disconnect");
        let shared = Self::launch_shared(&self.config).await.map_err(|_| {
            ReaderError::UpstreamBrowserFailure("browser relaunch failed".into())
        })?;
        let browser = shared.browser.clone();
        *slot = Some(shared);
        self.crippled.store(false, Ordering::Release);
        Ok(browser)
    }

    /// Close the browser process and remove its profile directory.
    pub async fn shutdown(&self) {
        let mut slot = self.browser.lock().await;
        if let Some(shared) = slot.take() {
            shared.teardown();
        }
        info!("browser pool shut down");
    }
}

/// Install the fixed page identity: the snapshot binding plus the
/// readability/reporter script that runs in every new document.
async fn configure_page(page: &Page) -> ReaderResult<()> {
    page.execute(AddBindingParams::new(SNAPSHOT_BINDING))
        .await
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("add binding: {e}")))?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(INIT_SCRIPT))
        .await
        .map_err(|e| ReaderError::UpstreamBrowserFailure(format!("inject scripts: {e}")))?;
    Ok(())
}

async fn dispose_context(
    browser: &Browser,
    ctx_id: chromiumoxide::cdp::browser_protocol::browser::BrowserContextId,
) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(ctx_id))
        .await
    {
        debug!("context disposal failed (browser gone?): {e}");
    }
}

/// RAII guard over one isolated context. Single-use: dropping it destroys
/// the context and frees the pool slot.
pub struct PooledContext {
    page: Option<Page>,
    ctx_id: Option<chromiumoxide::cdp::browser_protocol::browser::BrowserContextId>,
    browser: Arc<Browser>,
    _permit: OwnedSemaphorePermit,
}

impl PooledContext {
    pub fn page(&self) -> &Page {
        self.page.as_ref().expect("page present until drop")
    }

    /// Destroy the context eagerly and wait for disposal. Preferred over
    /// relying on `Drop`, which can only fire-and-forget.
    pub async fn dispose(mut self) {
        self.page.take();
        if let Some(ctx_id) = self.ctx_id.take() {
            dispose_context(&self.browser, ctx_id).await;
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        self.page.take();
        if let Some(ctx_id) = self.ctx_id.take() {
            let browser = self.browser.clone();
            tokio::spawn(async move {
                dispose_context(&browser, ctx_id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_honors_override() {
        let config = PoolConfig::detect(true, 3);
        assert_eq!(config.max_contexts, 3);
    }

    #[test]
    fn detect_never_drops_below_one() {
        let config = PoolConfig::detect(true, 0);
        assert!(config.max_contexts >= 1);
    }
}
