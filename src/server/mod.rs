//! HTTP server wiring.

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::browser_pool::{BrowserPool, PoolConfig};
use crate::config::ReaderConfig;
use crate::cruncher::NightlyCruncher;
use crate::error::ReaderResult;
use crate::interrogator::InterrogatorLoop;
use crate::llm::LlmClient;
use crate::snapshot::SnapshotPipeline;
use crate::storage::{FsObjectStorage, JsonlRecordStore, ObjectStorage};
use crate::tools::{BrowseTool, SearchWebTool, ToolRegistry};

/// Long-lived service values shared by every request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReaderConfig>,
    pub pool: Arc<BrowserPool>,
    pub pipeline: SnapshotPipeline,
    pub registry: Arc<ToolRegistry>,
    pub interrogator: InterrogatorLoop,
    pub storage: Arc<dyn ObjectStorage>,
    /// Concrete store so the crawl path can append; the cruncher sees it
    /// through the read-only trait
    pub records: Arc<JsonlRecordStore>,
    pub cruncher: Arc<NightlyCruncher>,
}

impl AppState {
    /// Launch the browser, open the stores, and wire every subsystem.
    /// A browser launch failure here is fatal.
    pub async fn build(config: ReaderConfig) -> ReaderResult<Self> {
        let pool_config = PoolConfig::detect(config.headless, config.pool_size);
        let pool = BrowserPool::launch(pool_config).await?;
        let pipeline = SnapshotPipeline::new(pool.clone());

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(BrowseTool::new(pipeline.clone())));
        registry.register(Arc::new(SearchWebTool::new(pool.clone())));
        let registry = Arc::new(registry);

        let llm = LlmClient::new(config.llm_base_url.clone(), config.llm_api_key.clone());
        let interrogator = InterrogatorLoop::new(llm, registry.clone());

        let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::new(
            config.data_dir.join("objects"),
            format!("http://{}/objects", config.bind_addr),
        ));
        let records =
            Arc::new(JsonlRecordStore::open(config.data_dir.join("records.jsonl")).await?);

        let cruncher = Arc::new(NightlyCruncher::new(
            records.clone(),
            storage.clone(),
            config.crunch.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            pool,
            pipeline,
            registry,
            interrogator,
            storage,
            records,
            cruncher,
        })
    }
}
