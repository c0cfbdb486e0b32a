//! RocksDB-backed record store.
//!
//! Column families:
//! - `markdown`  — canonical markdown bodies (LZ4 compressed)
//! - `snapshots` — CRDT document snapshots (LZ4 compressed)
//! - `records`   — record metadata (bincode: version tag, sizes,
//!   normalization audit, oversize notices)
//!
//! One save is one atomic `WriteBatch` across all three families, so the
//! markdown, snapshot, and version tag a reader observes always belong to
//! the same write. The version tag is a fresh UUID per save: any writer,
//! this process or another, moves it.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    MultiThreaded, Options, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PersistedRecord, RecordStore, SaveReceipt, SaveRequest, StoreError};

const CF_MARKDOWN: &str = "markdown";
const CF_SNAPSHOTS: &str = "snapshots";
const CF_RECORDS: &str = "records";

const COLUMN_FAMILIES: &[&str] = &[CF_MARKDOWN, CF_SNAPSHOTS, CF_RECORDS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("quill_data"),
            block_cache_size: 128 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl RocksStoreConfig {
    /// Config for testing (small caches, caller-provided temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// An oversize notice kept in the record metadata instead of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OversizeNoticeMeta {
    /// Reported sanitized-markdown byte length
    pub byte_size: u64,
    /// Which coordinator phase reported it
    pub source: String,
    /// Seconds since epoch
    pub reported_at: u64,
}

/// Record metadata stored alongside the markdown and snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Document UUID
    pub doc_id: Uuid,
    /// Opaque staleness marker, regenerated on every save
    pub version_tag: String,
    /// Whether a snapshot is stored for this record
    pub has_snapshot: bool,
    /// Uncompressed markdown size in bytes
    pub markdown_size: u64,
    /// Uncompressed snapshot size in bytes
    pub snapshot_size: u64,
    /// Whether the last save carried sanitizer-normalized markdown
    pub normalized: bool,
    /// Repetition count the sanitizer reported on the last save
    pub repeat_count: u64,
    /// Whether leading placeholders were stripped on the last save
    pub stripped_leading_placeholders: bool,
    /// Last oversize notice, if any since the last successful save
    pub oversize: Option<OversizeNoticeMeta>,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl RecordMeta {
    fn new(doc_id: Uuid) -> Self {
        let now = unix_now();
        Self {
            doc_id,
            version_tag: Uuid::new_v4().to_string(),
            has_snapshot: false,
            markdown_size: 0,
            snapshot_size: 0,
            normalized: false,
            repeat_count: 1,
            stripped_leading_placeholders: false,
            oversize: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Durable [`RecordStore`] over RocksDB.
pub struct RocksRecordStore {
    db: DBWithThreadMode<MultiThreaded>,
    config: RocksStoreConfig,
}

impl RocksRecordStore {
    /// Open the store at the configured path, creating the database and
    /// column families as needed.
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db, config })
    }

    fn cf_options(config: &RocksStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are LZ4'd by us already; skip RocksDB's own pass
        opts.set_compression_type(DBCompressionType::None);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    fn cf(&self, name: &str) -> Result<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("Column family '{name}' not found")))
    }

    /// Load record metadata, if the document has ever been saved.
    pub fn load_meta(&self, doc_id: Uuid) -> Result<Option<RecordMeta>, StoreError> {
        let cf = self.cf(CF_RECORDS)?;
        match self
            .db
            .get_cf(&cf, doc_id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(RecordMeta::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_compressed(&self, cf_name: &str, doc_id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(cf_name)?;
        match self
            .db
            .get_cf(&cf, doc_id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::Compression(e.to_string())),
            None => Ok(None),
        }
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// List all document ids with a stored record.
    pub fn list_documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_RECORDS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if key.len() == 16 {
                let bytes: [u8; 16] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Deserialization("Invalid UUID key".into()))?;
                ids.push(Uuid::from_bytes(bytes));
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl RecordStore for RocksRecordStore {
    async fn load(&self, doc_id: Uuid) -> Result<PersistedRecord, StoreError> {
        let meta = match self.load_meta(doc_id)? {
            Some(meta) => meta,
            // New document: empty record under a throwaway tag
            None => return Ok(PersistedRecord::empty(Uuid::new_v4().to_string())),
        };

        let markdown = match self.load_compressed(CF_MARKDOWN, doc_id)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?,
            None => String::new(),
        };

        Ok(PersistedRecord {
            markdown,
            snapshot_ref: meta.has_snapshot.then(|| meta.version_tag.clone()),
            version_tag: meta.version_tag,
        })
    }

    async fn fetch_snapshot(
        &self,
        doc_id: Uuid,
        _snapshot_ref: &str,
    ) -> Result<Vec<u8>, StoreError> {
        self.load_compressed(CF_SNAPSHOTS, doc_id)?
            .ok_or(StoreError::NotFound(doc_id))
    }

    async fn save(&self, doc_id: Uuid, request: SaveRequest) -> Result<SaveReceipt, StoreError> {
        let mut meta = self.load_meta(doc_id)?.unwrap_or_else(|| RecordMeta::new(doc_id));
        meta.version_tag = Uuid::new_v4().to_string();
        meta.has_snapshot = true;
        meta.markdown_size = request.markdown.len() as u64;
        meta.snapshot_size = request.snapshot.len() as u64;
        meta.normalized = request.normalized;
        meta.repeat_count = request.repeat_count as u64;
        meta.stripped_leading_placeholders = request.stripped_leading_placeholders;
        meta.oversize = None;
        meta.updated_at = unix_now();

        let markdown_lz4 = lz4_flex::compress_prepend_size(request.markdown.as_bytes());
        let snapshot_lz4 = lz4_flex::compress_prepend_size(&request.snapshot);

        let mut batch = WriteBatch::default();
        let key = doc_id.as_bytes();
        batch.put_cf(&self.cf(CF_MARKDOWN)?, key, &markdown_lz4);
        batch.put_cf(&self.cf(CF_SNAPSHOTS)?, key, &snapshot_lz4);
        batch.put_cf(&self.cf(CF_RECORDS)?, key, &meta.encode()?);
        self.write_batch(batch)?;

        Ok(SaveReceipt {
            version_tag: meta.version_tag,
        })
    }

    async fn notify_oversize(
        &self,
        doc_id: Uuid,
        byte_size: u64,
        source: &str,
    ) -> Result<(), StoreError> {
        let mut meta = self.load_meta(doc_id)?.unwrap_or_else(|| RecordMeta::new(doc_id));
        meta.oversize = Some(OversizeNoticeMeta {
            byte_size,
            source: source.to_string(),
            reported_at: unix_now(),
        });
        meta.updated_at = unix_now();

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(CF_RECORDS)?, doc_id.as_bytes(), &meta.encode()?);
        self.write_batch(batch)?;

        log::warn!("Oversize document {doc_id}: {byte_size} bytes (source: {source})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, RocksRecordStore) {
        let dir = tempdir().unwrap();
        let store = RocksRecordStore::open(RocksStoreConfig::for_testing(dir.path().join("db")))
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_unknown_document_loads_empty() {
        let (_dir, store) = open_temp();
        let record = store.load(Uuid::new_v4()).await.unwrap();
        assert_eq!(record.markdown, "");
        assert!(record.snapshot_ref.is_none());
        assert!(!record.version_tag.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let (_dir, store) = open_temp();
        let id = Uuid::new_v4();

        let receipt = store
            .save(id, SaveRequest::clean("# Doc\n\nBody text.\n", vec![1, 2, 3]))
            .await
            .unwrap();

        let record = store.load(id).await.unwrap();
        assert_eq!(record.markdown, "# Doc\n\nBody text.\n");
        assert_eq!(record.version_tag, receipt.version_tag);
        assert_eq!(record.snapshot_ref.as_deref(), Some(receipt.version_tag.as_str()));

        let snapshot = store
            .fetch_snapshot(id, record.snapshot_ref.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(snapshot, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_version_tag_changes_per_save() {
        let (_dir, store) = open_temp();
        let id = Uuid::new_v4();

        let r1 = store.save(id, SaveRequest::clean("a\n", vec![])).await.unwrap();
        let r2 = store.save(id, SaveRequest::clean("b\n", vec![])).await.unwrap();
        assert_ne!(r1.version_tag, r2.version_tag);

        let record = store.load(id).await.unwrap();
        assert_eq!(record.version_tag, r2.version_tag);
        assert_eq!(record.markdown, "b\n");
    }

    #[tokio::test]
    async fn test_normalization_metadata_persisted() {
        let (_dir, store) = open_temp();
        let id = Uuid::new_v4();

        store
            .save(
                id,
                SaveRequest {
                    markdown: "repaired\n".into(),
                    snapshot: vec![7],
                    normalized: true,
                    repeat_count: 3,
                    stripped_leading_placeholders: true,
                },
            )
            .await
            .unwrap();

        let meta = store.load_meta(id).unwrap().unwrap();
        assert!(meta.normalized);
        assert_eq!(meta.repeat_count, 3);
        assert!(meta.stripped_leading_placeholders);
        assert!(meta.oversize.is_none());
    }

    #[tokio::test]
    async fn test_oversize_notice_stored_without_content() {
        let (_dir, store) = open_temp();
        let id = Uuid::new_v4();

        store.notify_oversize(id, 2_000_000, "persist").await.unwrap();

        let meta = store.load_meta(id).unwrap().unwrap();
        let notice = meta.oversize.unwrap();
        assert_eq!(notice.byte_size, 2_000_000);
        assert_eq!(notice.source, "persist");

        // No content was written inline
        let record = store.load(id).await.unwrap();
        assert_eq!(record.markdown, "");
        assert!(record.snapshot_ref.is_none());
    }

    #[tokio::test]
    async fn test_save_clears_oversize_notice() {
        let (_dir, store) = open_temp();
        let id = Uuid::new_v4();

        store.notify_oversize(id, 1_500_000, "persist").await.unwrap();
        store.save(id, SaveRequest::clean("trimmed\n", vec![])).await.unwrap();

        let meta = store.load_meta(id).unwrap().unwrap();
        assert!(meta.oversize.is_none());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let id = Uuid::new_v4();
        let tag;

        {
            let store = RocksRecordStore::open(RocksStoreConfig::for_testing(&path)).unwrap();
            tag = store
                .save(id, SaveRequest::clean("survives\n", vec![42]))
                .await
                .unwrap()
                .version_tag;
        }

        let store = RocksRecordStore::open(RocksStoreConfig::for_testing(&path)).unwrap();
        let record = store.load(id).await.unwrap();
        assert_eq!(record.markdown, "survives\n");
        assert_eq!(record.version_tag, tag);
    }

    #[tokio::test]
    async fn test_list_documents() {
        let (_dir, store) = open_temp();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.save(*id, SaveRequest::clean("x\n", vec![])).await.unwrap();
        }

        let listed = store.list_documents().unwrap();
        assert_eq!(listed.len(), 3);
        for id in &ids {
            assert!(listed.contains(id));
        }
    }
}
