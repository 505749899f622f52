//! Object storage and the crawled-record store.
//!
//! Both are small traits so the cruncher and the screenshot formatter can be
//! tested against in-memory implementations. The shipped implementation is
//! filesystem-backed under the service data dir; object keys map directly to
//! relative paths.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::{ReaderError, ReaderResult};

/// Object-storage key prefix for raw snapshot blobs
pub const SNAPSHOT_PREFIX: &str = "snapshots";

/// Blob store addressed by string keys (`snapshots/<id>`,
/// `<prefix>/r<rev>/<day>-<offset>.jsonl`, `screenshots/<id>.png`)
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn exists(&self, key: &str) -> ReaderResult<bool>;
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> ReaderResult<()>;
    async fn get(&self, key: &str) -> ReaderResult<Vec<u8>>;
    /// Public URL for a stored object
    fn url_for(&self, key: &str) -> String;
}

/// One crawled page as the cruncher sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub snapshot_path: String,
}

/// Timestamp-ordered record store, read-only from the cruncher's view
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records with `created_at` inside the UTC day, ascending, paged by
    /// numeric offset
    async fn query_day(
        &self,
        day: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> ReaderResult<Vec<CrawledRecord>>;
}

// =============================================================================
// Filesystem object storage
// =============================================================================

/// Filesystem-backed object storage rooted at the data dir
#[derive(Debug)]
pub struct FsObjectStorage {
    root: PathBuf,
    public_base: String,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    fn path_for(&self, key: &str) -> ReaderResult<PathBuf> {
        if key.split('/').any(|part| part == "..") || key.starts_with('/') {
            return Err(ReaderError::InvalidArgument(format!(
                "bad object key: {key}"
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn exists(&self, key: &str) -> ReaderResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)?)
            .await
            .map_err(|e| ReaderError::StorageFailure(e.to_string()))?)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> ReaderResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ReaderError::StorageFailure(e.to_string()))
    }

    async fn get(&self, key: &str) -> ReaderResult<Vec<u8>> {
        tokio::fs::read(self.path_for(key)?)
            .await
            .map_err(|e| ReaderError::StorageFailure(format!("read {key}: {e}")))
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_base.trim_end_matches('/'))
    }
}

// =============================================================================
// In-memory object storage (tests, ephemeral deployments)
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn exists(&self, key: &str) -> ReaderResult<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> ReaderResult<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> ReaderResult<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ReaderError::StorageFailure(format!("no such object: {key}")))
    }

    fn url_for(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

// =============================================================================
// Record store
// =============================================================================

/// Record store over a JSONL index file.
///
/// The crawl path appends one line per stored snapshot through
/// [`append`](Self::append), which also inserts into the in-memory sorted
/// view so a later crunch run in the same process sees the new records.
/// Also constructible from a plain record list for tests.
#[derive(Debug, Default)]
pub struct JsonlRecordStore {
    path: Option<PathBuf>,
    records: Mutex<Vec<CrawledRecord>>,
}

impl JsonlRecordStore {
    pub fn from_records(mut records: Vec<CrawledRecord>) -> Self {
        records.sort_by_key(|r| r.created_at);
        Self {
            path: None,
            records: Mutex::new(records),
        }
    }

    /// Load the index file (which may not exist yet). Appends go back to
    /// the same path.
    pub async fn open(path: impl Into<PathBuf>) -> ReaderResult<Self> {
        let path = path.into();
        let mut records = Vec::new();
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ReaderError::StorageFailure(e.to_string()))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CrawledRecord>(line) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("skipping malformed record line: {e}"),
                }
            }
            records.sort_by_key(|r| r.created_at);
        }
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    /// Record one crawled snapshot: a line on disk plus the in-memory
    /// sorted view.
    pub async fn append(&self, record: CrawledRecord) -> ReaderResult<()> {
        if let Some(path) = &self.path {
            let line = serde_json::to_string(&record)
                .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
            }
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
            file.write_all(format!("{line}\n").as_bytes())
                .await
                .map_err(|e| ReaderError::StorageFailure(e.to_string()))?;
        }

        let mut records = self.records.lock().await;
        let idx = records.partition_point(|r| r.created_at <= record.created_at);
        records.insert(idx, record);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn query_day(
        &self,
        day: NaiveDate,
        offset: usize,
        limit: usize,
    ) -> ReaderResult<Vec<CrawledRecord>> {
        let start = day
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        let end = start + chrono::Duration::days(1);
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, ts: &str) -> CrawledRecord {
        let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap();
        CrawledRecord {
            id: id.into(),
            created_at: naive.and_utc(),
            snapshot_path: format!("{SNAPSHOT_PREFIX}/{id}"),
        }
    }

    #[tokio::test]
    async fn query_day_respects_boundaries_and_order() {
        let store = JsonlRecordStore::from_records(vec![
            record("c", "2026-07-01 23:59:59"),
            record("a", "2026-07-01 00:00:00"),
            record("b", "2026-07-01 12:00:00"),
            record("next-day", "2026-07-02 00:00:00"),
        ]);
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let rows = store.query_day(day, 0, 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn query_day_pages_by_offset() {
        let store = JsonlRecordStore::from_records(
            (0..5)
                .map(|i| record(&format!("r{i}"), &format!("2026-07-01 0{i}:00:00")))
                .collect(),
        );
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let page = store.query_day(day, 2, 2).await.unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn append_is_visible_without_reopen() {
        let store = JsonlRecordStore::from_records(vec![record("a", "2026-07-01 01:00:00")]);
        store
            .append(record("late", "2026-07-01 00:30:00"))
            .await
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let rows = store.query_day(day, 0, 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        // inserted in timestamp order, not arrival order
        assert_eq!(ids, vec!["late", "a"]);
    }

    #[tokio::test]
    async fn append_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        let store = JsonlRecordStore::open(&path).await.unwrap();
        store
            .append(record("r1", "2026-07-01 08:00:00"))
            .await
            .unwrap();
        store
            .append(record("r2", "2026-07-01 09:00:00"))
            .await
            .unwrap();

        let reopened = JsonlRecordStore::open(&path).await.unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let rows = reopened.query_day(day, 0, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "r1");
    }

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryObjectStorage::new();
        storage
            .put("snapshots/x", b"{}".to_vec(), "application/json")
            .await
            .unwrap();
        assert!(storage.exists("snapshots/x").await.unwrap());
        assert_eq!(storage.get("snapshots/x").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn fs_storage_rejects_traversal() {
        let storage = FsObjectStorage::new("/tmp/pagereader-test", "http://localhost/objects");
        assert!(storage.get("../etc/passwd").await.is_err());
    }
}
