pub mod browser_pool;
pub mod browser_setup;
pub mod config;
pub mod cruncher;
pub mod error;
pub mod formatter;
pub mod interrogator;
pub mod jsonstream;
pub mod llm;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod tools;
pub mod utils;

pub use browser_pool::{BrowserPool, PoolConfig, PooledContext};
pub use browser_setup::{find_browser_executable, launch_browser};
pub use config::{CrunchConfig, ReaderConfig};
pub use cruncher::{CrunchEvent, NightlyCruncher};
pub use error::{ReaderError, ReaderResult};
pub use formatter::{
    expand_markdown, format_snapshot, FormatPolicies, FormattedPage, PromptSegment, RespondWith,
};
pub use interrogator::{ChatEvent, ChatParams, InterrogatorLoop};
pub use jsonstream::{parse_lenient, IncrementalJsonStream, JsonStreamEvent, JsonStreamOptions};
pub use llm::{ChatMessage, ChatOptions, LlmClient, Role, ToolCall};
pub use server::{routes::create_router, AppState};
pub use snapshot::{CookieSpec, PageResult, ScrapeOptions, Snapshot, SnapshotPipeline};
pub use storage::{
    CrawledRecord, FsObjectStorage, JsonlRecordStore, MemoryObjectStorage, ObjectStorage,
    RecordStore,
};
pub use tools::{BrowseTool, SearchWebTool, Tool, ToolDescriptor, ToolRegistry};
