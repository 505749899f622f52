//! Nightly snapshot cruncher.
//!
//! Idempotent per-day batch over the crawled-record store: for each UTC day
//! in the trailing window it formats every stored snapshot and uploads
//! line-delimited JSON archives to object storage. Finished archives are
//! never rewritten, so re-running a window is a no-op.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CrunchConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::formatter::{format_snapshot, RespondWith};
use crate::snapshot::Snapshot;
use crate::storage::{CrawledRecord, ObjectStorage, RecordStore};
use crate::utils::constants::{CRUNCH_BATCH_SIZE, CRUNCH_MAX_IN_FLIGHT};

/// Progress reported to an HTTP caller as server-sent events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrunchEvent {
    /// Start sentinel: the day window about to be processed
    Started { from: NaiveDate, to: NaiveDate },
    /// One archive uploaded
    File { name: String },
    /// End sentinel with every archive produced by this run
    Finished { files: Vec<String> },
}

/// One archive line: the formatted page for a crawled record
#[derive(Debug, Serialize)]
struct CrunchLine<'a> {
    url: &'a str,
    html: &'a str,
    content: &'a str,
}

pub struct NightlyCruncher {
    records: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    config: CrunchConfig,
}

impl NightlyCruncher {
    pub fn new(
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        config: CrunchConfig,
    ) -> Self {
        Self {
            records,
            storage,
            config,
        }
    }

    /// Archive object name for one `(day, offset)` partition.
    ///
    /// The first batch is labelled with the literal `00000`; later batches
    /// use the raw decimal offset. Asymmetric, but existing archives were
    /// written this way and the name is the idempotence key.
    pub fn object_name(&self, day: NaiveDate, offset: usize) -> String {
        let label = if offset == 0 {
            "00000".to_string()
        } else {
            offset.to_string()
        };
        format!(
            "{}/r{}/{}-{label}.jsonl",
            self.config.prefix,
            self.config.rev,
            day.format("%Y-%m-%d")
        )
    }

    /// Run the job for the trailing window ending yesterday (UTC).
    pub async fn crunch(
        &self,
        progress: Option<mpsc::Sender<CrunchEvent>>,
    ) -> ReaderResult<Vec<String>> {
        self.crunch_until(Utc::now().date_naive(), progress).await
    }

    /// Run the job for the window `today − t_minus .. today` (exclusive).
    /// Split out from [`crunch`](Self::crunch) so tests can pin the clock.
    pub async fn crunch_until(
        &self,
        today: NaiveDate,
        progress: Option<mpsc::Sender<CrunchEvent>>,
    ) -> ReaderResult<Vec<String>> {
        let from = today - ChronoDuration::days(self.config.t_minus_days);
        if let Some(tx) = &progress {
            let _ = tx.send(CrunchEvent::Started { from, to: today }).await;
        }

        let mut produced = Vec::new();
        let mut day = from;
        while day < today {
            let mut offset = 0usize;
            loop {
                let name = self.object_name(day, offset);
                if self.storage.exists(&name).await? {
                    // Already archived by an earlier run
                    offset += CRUNCH_BATCH_SIZE;
                    continue;
                }

                let batch = self
                    .records
                    .query_day(day, offset, CRUNCH_BATCH_SIZE)
                    .await?;
                if batch.is_empty() {
                    break;
                }

                self.write_batch(&name, &batch).await?;
                info!("crunched {} records into {name}", batch.len());
                if let Some(tx) = &progress {
                    let _ = tx.send(CrunchEvent::File { name: name.clone() }).await;
                }
                produced.push(name);
                offset += CRUNCH_BATCH_SIZE;
            }
            day += ChronoDuration::days(1);
        }

        if let Some(tx) = &progress {
            let _ = tx
                .send(CrunchEvent::Finished {
                    files: produced.clone(),
                })
                .await;
        }
        Ok(produced)
    }

    /// Format one batch into a temp file and upload it.
    ///
    /// Snapshot fetches run up to 100 in flight; lines are written in
    /// record order through the single file handle.
    async fn write_batch(&self, name: &str, batch: &[CrawledRecord]) -> ReaderResult<()> {
        let tmp_path = temp_file_path();
        let file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ReaderError::StorageFailure(format!("temp file: {e}")))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let mut lines = futures::stream::iter(batch.iter().cloned().map(|record| {
            let storage = self.storage.clone();
            async move { (record.id.clone(), fetch_and_format(storage, &record).await) }
        }))
        .buffered(CRUNCH_MAX_IN_FLIGHT);

        while let Some((record_id, line)) = lines.next().await {
            match line {
                Some(line) => {
                    writer
                        .write_all(line.as_bytes())
                        .await
                        .map_err(|e| ReaderError::StorageFailure(format!("write line: {e}")))?;
                    writer
                        .write_all(b"\n")
                        .await
                        .map_err(|e| ReaderError::StorageFailure(format!("write line: {e}")))?;
                }
                // A bad record never sinks the batch
                None => warn!("skipping record {record_id}: snapshot unreadable"),
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| ReaderError::StorageFailure(format!("flush: {e}")))?;
        drop(writer);

        let bytes = tokio::fs::read(&tmp_path)
            .await
            .map_err(|e| ReaderError::StorageFailure(format!("read temp: {e}")))?;
        let result = self.storage.put(name, bytes, "application/jsonl").await;
        let _ = tokio::fs::remove_file(&tmp_path).await;
        result
    }
}

fn temp_file_path() -> PathBuf {
    std::env::temp_dir().join(format!("pagereader_crunch_{}.jsonl", Uuid::new_v4().simple()))
}

/// Next scheduled run: 02:00 UTC, today if still ahead, otherwise tomorrow.
pub fn next_run_after(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let today_run = now
        .date_naive()
        .and_hms_opt(2, 0, 0)
        .expect("02:00 exists")
        .and_utc();
    if today_run > now {
        today_run
    } else {
        today_run + ChronoDuration::days(1)
    }
}

/// Fetch one snapshot blob and render its archive line.
/// Returns `None` on any per-record failure (logged by the caller).
async fn fetch_and_format(storage: Arc<dyn ObjectStorage>, record: &CrawledRecord) -> Option<String> {
    let blob = storage.get(&record.snapshot_path).await.ok()?;
    let snapshot: Snapshot = serde_json::from_slice(&blob).ok()?;

    let page = format_snapshot(RespondWith::Default, &snapshot);
    let page = if page.has_content() {
        page
    } else {
        format_snapshot(RespondWith::Markdown, &snapshot)
    };

    let line = CrunchLine {
        url: &snapshot.href,
        html: &snapshot.html,
        content: page.content.as_deref().unwrap_or_default(),
    };
    serde_json::to_string(&line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cruncher_for_naming() -> NightlyCruncher {
        NightlyCruncher::new(
            Arc::new(crate::storage::JsonlRecordStore::default()),
            Arc::new(crate::storage::MemoryObjectStorage::new()),
            CrunchConfig::default(),
        )
    }

    #[test]
    fn next_run_is_two_am_utc() {
        let before = chrono::DateTime::parse_from_rfc3339("2026-07-01T01:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_run_after(before).to_rfc3339(), "2026-07-01T02:00:00+00:00");

        let after = chrono::DateTime::parse_from_rfc3339("2026-07-01T02:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next_run_after(after).to_rfc3339(), "2026-07-02T02:00:00+00:00");
    }

    #[test]
    fn first_offset_label_is_literal_zeroes() {
        let cruncher = cruncher_for_naming();
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        assert_eq!(
            cruncher.object_name(day, 0),
            "crunched/r2/2026-07-01-00000.jsonl"
        );
        assert_eq!(
            cruncher.object_name(day, 10_000),
            "crunched/r2/2026-07-01-10000.jsonl"
        );
        assert_eq!(
            cruncher.object_name(day, 20_000),
            "crunched/r2/2026-07-01-20000.jsonl"
        );
    }
}
