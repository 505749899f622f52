//! `browse` tool: fetch one URL and return its markdown content.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use url::Url;

use super::{AnyhowError, Tool};
use crate::formatter::{format_snapshot, RespondWith};
use crate::snapshot::{ScrapeOptions, SnapshotPipeline};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowseArgs {
    /// Absolute http(s) URL of the page to read
    pub url: String,
}

pub struct BrowseTool {
    pipeline: SnapshotPipeline,
}

impl BrowseTool {
    pub fn new(pipeline: SnapshotPipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Tool for BrowseTool {
    const NAME: &'static str = "browse";
    type Args = BrowseArgs;
    type Output = String;
    type Error = AnyhowError;

    fn description(&self) -> &str {
        "Load a web page in a real browser and return its readable content as Markdown. \
         Use this to read the current content of any URL."
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.call_inner(args).await.map_err(AnyhowError)
    }
}

impl BrowseTool {
    async fn call_inner(&self, args: BrowseArgs) -> anyhow::Result<String> {
        let url = Url::parse(&args.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("unsupported URL scheme: {}", url.scheme());
        }

        let result = self
            .pipeline
            .scrape_final(url, ScrapeOptions::default())
            .await?;

        // Article extraction first; whole-page markdown when readability
        // found nothing
        let page = format_snapshot(RespondWith::Default, &result.snapshot);
        let page = if page.has_content() {
            page
        } else {
            format_snapshot(RespondWith::Markdown, &result.snapshot)
        };

        Ok(page.to_string())
    }
}
