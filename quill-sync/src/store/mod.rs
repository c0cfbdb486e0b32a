//! Persistence store contract for collaborative documents.
//!
//! The coordinator only ever talks to [`RecordStore`]; the transport behind
//! it (embedded RocksDB here, an HTTP record service elsewhere) is the
//! host's choice. All three operations may fail with a transport error,
//! which the coordinator degrades to retry-on-next-trigger.
//!
//! ```text
//! ┌──────────────────┐   load / save /   ┌───────────────┐
//! │ SyncCoordinator  │ ────────────────► │  RecordStore  │
//! │                  │  notify_oversize  │  (trait)      │
//! └──────────────────┘                   └──────┬────────┘
//!                                    ┌──────────┴──────────┐
//!                                    ▼                     ▼
//!                             RocksRecordStore       MemoryStore
//!                             (durable, LZ4)         (tests, hosts)
//! ```

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RecordMeta, RocksRecordStore, RocksStoreConfig};

use async_trait::async_trait;
use uuid::Uuid;

/// Store errors. `Clone` because bootstrap failures travel through a
/// shared future awaited by every concurrent session attach.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend/database failure
    Backend(String),
    /// Record or snapshot not present
    NotFound(Uuid),
    /// Metadata encoding failed
    Serialization(String),
    /// Metadata decoding failed
    Deserialization(String),
    /// Snapshot/markdown compression failed
    Compression(String),
    /// Transport unavailable (network store, failure injection)
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Backend(e) => write!(f, "Store backend error: {e}"),
            StoreError::NotFound(id) => write!(f, "Record not found: {id}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A document's persisted state as the store returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    /// Canonical markdown body
    pub markdown: String,
    /// Reference to a stored CRDT snapshot, if one exists
    pub snapshot_ref: Option<String>,
    /// Opaque staleness marker; changes on every write by any writer
    pub version_tag: String,
}

impl PersistedRecord {
    /// Record for a document the store has never seen.
    pub fn empty(version_tag: impl Into<String>) -> Self {
        Self {
            markdown: String::new(),
            snapshot_ref: None,
            version_tag: version_tag.into(),
        }
    }
}

/// Payload for a save: content plus normalization metadata so the store can
/// audit what repairs the coordinator applied.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Markdown to persist (already sanitized when `normalized` is set)
    pub markdown: String,
    /// CRDT snapshot of the document producing that markdown
    pub snapshot: Vec<u8>,
    /// Whether the sanitizer changed the serialized markdown
    pub normalized: bool,
    /// Repetition count the sanitizer reported
    pub repeat_count: usize,
    /// Whether leading placeholders were stripped
    pub stripped_leading_placeholders: bool,
}

impl SaveRequest {
    /// Clean save: markdown persisted exactly as serialized.
    pub fn clean(markdown: impl Into<String>, snapshot: Vec<u8>) -> Self {
        Self {
            markdown: markdown.into(),
            snapshot,
            normalized: false,
            repeat_count: 1,
            stripped_leading_placeholders: false,
        }
    }
}

/// Receipt from a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    /// New version tag for the record
    pub version_tag: String,
}

/// Persistence store for collaborative document records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load a document's record. Unknown ids yield an empty record with a
    /// fresh version tag rather than an error; the first session of a new
    /// document bootstraps an empty doc.
    async fn load(&self, doc_id: Uuid) -> Result<PersistedRecord, StoreError>;

    /// Fetch the CRDT snapshot bytes behind a record's `snapshot_ref`.
    async fn fetch_snapshot(&self, doc_id: Uuid, snapshot_ref: &str)
        -> Result<Vec<u8>, StoreError>;

    /// Persist markdown + snapshot. Returns the record's new version tag.
    async fn save(&self, doc_id: Uuid, request: SaveRequest) -> Result<SaveReceipt, StoreError>;

    /// Record an oversize condition without persisting content inline.
    async fn notify_oversize(
        &self,
        doc_id: Uuid,
        byte_size: u64,
        source: &str,
    ) -> Result<(), StoreError>;
}
