//! In-memory record store.
//!
//! Backs single-process hosts and the integration tests: counts every call,
//! supports failure injection for transient-error paths, and can delay
//! `load` so concurrent-bootstrap races are reproducible.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PersistedRecord, RecordStore, SaveReceipt, SaveRequest, StoreError};

/// One oversize notice as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizeNotice {
    pub doc_id: Uuid,
    pub byte_size: u64,
    pub source: String,
}

#[derive(Debug, Clone, Default)]
struct StoredRecord {
    markdown: String,
    snapshot: Option<Vec<u8>>,
    /// Monotonic per-record save counter; version tag is "v{seq}"
    seq: u64,
    normalized: bool,
    repeat_count: usize,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<Uuid, StoredRecord>,
    load_calls: u64,
    save_calls: u64,
    snapshot_fetches: u64,
    oversize_notices: Vec<OversizeNotice>,
    fail_loads: bool,
    fail_saves: bool,
}

/// In-memory [`RecordStore`] with observation hooks.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    load_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `load` by `delay`, widening the window in which
    /// concurrent bootstraps overlap.
    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            inner: Mutex::default(),
            load_delay: Some(delay),
        }
    }

    /// Seed a record as if a previous session had saved it.
    pub async fn seed(&self, doc_id: Uuid, markdown: &str, snapshot: Option<Vec<u8>>) {
        let mut inner = self.inner.lock().await;
        inner.records.insert(
            doc_id,
            StoredRecord {
                markdown: markdown.to_string(),
                snapshot,
                seq: 1,
                normalized: false,
                repeat_count: 1,
            },
        );
    }

    pub async fn set_fail_loads(&self, fail: bool) {
        self.inner.lock().await.fail_loads = fail;
    }

    pub async fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().await.fail_saves = fail;
    }

    pub async fn load_calls(&self) -> u64 {
        self.inner.lock().await.load_calls
    }

    pub async fn save_calls(&self) -> u64 {
        self.inner.lock().await.save_calls
    }

    pub async fn snapshot_fetches(&self) -> u64 {
        self.inner.lock().await.snapshot_fetches
    }

    pub async fn oversize_notices(&self) -> Vec<OversizeNotice> {
        self.inner.lock().await.oversize_notices.clone()
    }

    /// Markdown currently stored for a document.
    pub async fn stored_markdown(&self, doc_id: Uuid) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.records.get(&doc_id).map(|r| r.markdown.clone())
    }

    /// Snapshot currently stored for a document.
    pub async fn stored_snapshot(&self, doc_id: Uuid) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.records.get(&doc_id).and_then(|r| r.snapshot.clone())
    }

    /// Current version tag for a document ("v0" when unknown).
    pub async fn version_tag(&self, doc_id: Uuid) -> String {
        let inner = self.inner.lock().await;
        let seq = inner.records.get(&doc_id).map_or(0, |r| r.seq);
        format!("v{seq}")
    }

    /// Overwrite a record's markdown as if another writer updated it,
    /// advancing the version tag.
    pub async fn external_write(&self, doc_id: Uuid, markdown: &str) {
        let mut inner = self.inner.lock().await;
        let record = inner.records.entry(doc_id).or_default();
        record.markdown = markdown.to_string();
        record.snapshot = None;
        record.seq += 1;
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self, doc_id: Uuid) -> Result<PersistedRecord, StoreError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().await;
        inner.load_calls += 1;
        if inner.fail_loads {
            return Err(StoreError::Unavailable("injected load failure".into()));
        }
        match inner.records.get(&doc_id) {
            Some(record) => Ok(PersistedRecord {
                markdown: record.markdown.clone(),
                snapshot_ref: record.snapshot.as_ref().map(|_| format!("v{}", record.seq)),
                version_tag: format!("v{}", record.seq),
            }),
            None => Ok(PersistedRecord::empty("v0")),
        }
    }

    async fn fetch_snapshot(
        &self,
        doc_id: Uuid,
        _snapshot_ref: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.snapshot_fetches += 1;
        inner
            .records
            .get(&doc_id)
            .and_then(|r| r.snapshot.clone())
            .ok_or(StoreError::NotFound(doc_id))
    }

    async fn save(&self, doc_id: Uuid, request: SaveRequest) -> Result<SaveReceipt, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.save_calls += 1;
        if inner.fail_saves {
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        let record = inner.records.entry(doc_id).or_default();
        record.markdown = request.markdown;
        record.snapshot = Some(request.snapshot);
        record.normalized = request.normalized;
        record.repeat_count = request.repeat_count;
        record.seq += 1;
        Ok(SaveReceipt {
            version_tag: format!("v{}", record.seq),
        })
    }

    async fn notify_oversize(
        &self,
        doc_id: Uuid,
        byte_size: u64,
        source: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.oversize_notices.push(OversizeNotice {
            doc_id,
            byte_size,
            source: source.to_string(),
        });
        Ok(())
    }
}
