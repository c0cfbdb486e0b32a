//! Bootstrap and persist coordination for collaborative documents.
//!
//! The two halves of the save-then-reload problem live here:
//!
//! - [`SyncCoordinator::bootstrap`] initializes a session's Yrs document
//!   from the persisted record, race-safe against concurrent attaches for
//!   the same document (one shared in-flight future per id).
//! - [`SyncCoordinator::persist`] writes the document back without
//!   triggering rebuild loops: bootstrap round-trips are skipped via a
//!   recorded baseline, cosmetic trailing trims never mutate the live
//!   document, and only genuine corruption triggers an atomic rebuild.
//!
//! All store calls are the only suspension points; sanitization and
//! serialization are synchronous and linear in document size. No failure
//! here may take down the host: every error degrades to retry-on-next-
//! trigger with the live CRDT as the source of truth.

use std::sync::Arc;

use futures_util::FutureExt;
use uuid::Uuid;
use yrs::Doc;

use crate::config::SyncConfig;
use crate::document::{self, MarkdownCodec, TextCodec};
use crate::registry::{Phase, SessionRegistry};
use crate::sanitize::{sanitize_with, Sanitization};
use crate::store::{RecordStore, SaveRequest, StoreError};

/// Bootstrap failure. `Clone` because every concurrent attach awaiting the
/// shared in-flight future receives the same result.
#[derive(Debug, Clone)]
pub enum BootstrapError {
    /// The store record load failed; retried on the next attach
    Store(StoreError),
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Store(e) => write!(f, "Bootstrap load failed: {e}"),
        }
    }
}

impl std::error::Error for BootstrapError {}

impl From<StoreError> for BootstrapError {
    fn from(e: StoreError) -> Self {
        BootstrapError::Store(e)
    }
}

/// What a persist call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Content and snapshot saved under a new version tag.
    Saved { version_tag: String },
    /// Content matched the bootstrap baseline: no real edits, nothing saved.
    SkippedBaseline,
    /// Serialization and the plain-text fallback both failed; skipped.
    SkippedSerialization,
    /// Content exceeded the oversize threshold; nothing saved inline.
    Oversize { byte_size: usize, notified: bool },
}

struct Inner {
    config: SyncConfig,
    registry: SessionRegistry,
    store: Arc<dyn RecordStore>,
    codec: Arc<dyn MarkdownCodec>,
}

/// The synchronization coordinator. Cheap to clone; all clones share the
/// same registry. Safe to call without external locking.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Coordinator with the plain-text codec.
    pub fn new(config: SyncConfig, store: Arc<dyn RecordStore>) -> Self {
        Self::with_codec(config, store, Arc::new(TextCodec))
    }

    /// Coordinator with a host-provided markdown codec.
    pub fn with_codec(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        codec: Arc<dyn MarkdownCodec>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: SessionRegistry::new(),
                store,
                codec,
            }),
        }
    }

    /// The per-document session registry (host inspection, tests).
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Initialize `doc` from the persisted record. Called once per session
    /// attach; concurrent calls for the same id share one store load and
    /// one document mutation.
    pub async fn bootstrap(&self, doc_id: Uuid, doc: &Doc) -> Result<(), BootstrapError> {
        let (fut, owner) = self
            .inner
            .registry
            .join_or_register_bootstrap(doc_id, || {
                let inner = self.inner.clone();
                let doc = doc.clone();
                async move { inner.run_bootstrap(doc_id, &doc).await }
                    .boxed()
                    .shared()
            })
            .await;

        let result = fut.await;
        if owner {
            self.inner.registry.clear_in_flight(doc_id).await;
        }
        result
    }

    /// Persist `doc` to the store. Called on debounced edits and on the
    /// final disconnect flush. Idempotent for identical document state, so
    /// overlapping calls need no mutual exclusion.
    pub async fn persist(&self, doc_id: Uuid, doc: &Doc) -> Result<PersistOutcome, StoreError> {
        self.inner.run_persist(doc_id, doc).await
    }

    /// Final flush when the last client disconnects, then registry cleanup.
    /// The entry is removed only after the flush finished, so no racing
    /// flush can observe partially-removed state.
    pub async fn release(&self, doc_id: Uuid, doc: &Doc) -> Result<PersistOutcome, StoreError> {
        let result = self.inner.run_persist(doc_id, doc).await;
        self.inner.registry.remove(doc_id).await;
        result
    }
}

impl Inner {
    fn sanitize(&self, markdown: &str) -> Sanitization {
        sanitize_with(markdown, &self.config.limits)
    }

    async fn log_error(&self, doc_id: Uuid, phase: Phase, message: &str) {
        if self
            .registry
            .should_log_error(doc_id, phase, self.config.error_log_interval)
            .await
        {
            log::error!("{message} (document {doc_id})");
        }
    }

    // ─── Bootstrap ────────────────────────────────────────────────────

    async fn run_bootstrap(&self, doc_id: Uuid, doc: &Doc) -> Result<(), BootstrapError> {
        let record = match self.store.load(doc_id).await {
            Ok(record) => record,
            Err(e) => {
                self.log_error(doc_id, Phase::Load, &format!("Record load failed: {e}"))
                    .await;
                return Err(e.into());
            }
        };

        let remote = self.sanitize(&record.markdown);
        let local_markdown = self.codec.to_markdown(doc).unwrap_or_default();
        let local_has_content = !self.sanitize(&local_markdown).content.is_empty();

        let loaded = self.registry.loaded_version(doc_id).await;
        if local_has_content && loaded.as_deref() == Some(record.version_tag.as_str()) {
            // Live document is current; re-record the tag and stop
            self.registry
                .set_loaded_version(doc_id, record.version_tag)
                .await;
            return Ok(());
        }

        if remote.repeat_count > 1 || remote.stripped_leading_placeholders {
            log::info!(
                "Repaired stored markdown for document {doc_id}: repeat_count={}, stripped_leading={}",
                remote.repeat_count,
                remote.stripped_leading_placeholders
            );
        }

        document::clear(doc);

        // A corrupt markdown body means the stored snapshot went through
        // the same broken round-trip; never trust it.
        let snapshot_usable = !remote.is_corruption();
        let mut applied_snapshot = false;

        if snapshot_usable {
            if let Some(snapshot_ref) = record.snapshot_ref.as_deref() {
                match self.store.fetch_snapshot(doc_id, snapshot_ref).await {
                    Ok(bytes) => match document::probe_snapshot(&bytes) {
                        Ok(non_empty) if non_empty || remote.content.is_empty() => {
                            if document::apply_snapshot(doc, &bytes).is_ok() {
                                applied_snapshot = true;
                            }
                        }
                        Ok(_) => {
                            // Empty snapshot but markdown exists: rebuild below
                        }
                        Err(e) => {
                            self.log_error(
                                doc_id,
                                Phase::SnapshotFetch,
                                &format!("Stored snapshot unusable: {e}"),
                            )
                            .await;
                        }
                    },
                    Err(e) => {
                        self.log_error(
                            doc_id,
                            Phase::SnapshotFetch,
                            &format!("Snapshot fetch failed: {e}"),
                        )
                        .await;
                    }
                }
            }
        }

        let mut rebuilt_from_markdown = false;
        if !applied_snapshot && !remote.content.is_empty() {
            match self.codec.apply_markdown(doc, &remote.content) {
                Ok(()) => rebuilt_from_markdown = true,
                Err(e) => {
                    // Session continues with an empty document
                    self.log_error(
                        doc_id,
                        Phase::Convert,
                        &format!("Markdown conversion failed, starting empty: {e}"),
                    )
                    .await;
                }
            }
        }

        self.registry
            .set_loaded_version(doc_id, record.version_tag)
            .await;

        if rebuilt_from_markdown {
            // The first save after a markdown rebuild serializes this exact
            // content back; remember it so that save can be skipped.
            if let Ok(markdown) = self.codec.to_markdown(doc) {
                let baseline = self.sanitize(&markdown).content;
                self.registry.set_bootstrap_baseline(doc_id, baseline).await;
            }
        }

        Ok(())
    }

    // ─── Persist ──────────────────────────────────────────────────────

    async fn run_persist(&self, doc_id: Uuid, doc: &Doc) -> Result<PersistOutcome, StoreError> {
        let serialized = match self.codec.to_markdown(doc) {
            Ok(markdown) => markdown,
            Err(e) => {
                log::warn!("Serialization failed for document {doc_id}, using plain text: {e}");
                match self.codec.extract_plain_text(doc) {
                    Ok(text) => text,
                    Err(e) => {
                        self.log_error(
                            doc_id,
                            Phase::Save,
                            &format!("Plain-text fallback failed, skipping persist: {e}"),
                        )
                        .await;
                        return Ok(PersistOutcome::SkippedSerialization);
                    }
                }
            }
        };

        let sanitized = self.sanitize(&serialized);

        if let Some(baseline) = self.registry.bootstrap_baseline(doc_id).await {
            if baseline == sanitized.content {
                // Bootstrap round-trip with no real edit
                self.registry.clear_bootstrap_baseline(doc_id).await;
                return Ok(PersistOutcome::SkippedBaseline);
            }
        }

        let byte_size = sanitized.content.len();
        if byte_size > self.config.oversize_threshold_bytes {
            return Ok(self.report_oversize(doc_id, byte_size).await);
        }

        let request = if sanitized.is_clean() {
            // Serialized output was already canonical
            SaveRequest::clean(serialized, document::encode_snapshot(doc))
        } else if !sanitized.is_corruption() {
            // Trailing placeholders only: persist the trimmed markdown but
            // leave the live document alone, otherwise the next render
            // re-inserts the padding and every save rewrites the record
            SaveRequest {
                markdown: sanitized.content.clone(),
                snapshot: document::encode_snapshot(doc),
                normalized: true,
                repeat_count: sanitized.repeat_count,
                stripped_leading_placeholders: false,
            }
        } else {
            // Genuine corruption: rebuild the live document from the
            // repaired markdown in one atomic replace, persist the rebuilt
            // state
            log::info!(
                "Rebuilding document {doc_id} from sanitized markdown: repeat_count={}, stripped_leading={}",
                sanitized.repeat_count,
                sanitized.stripped_leading_placeholders
            );
            if let Err(e) = self.codec.apply_markdown(doc, &sanitized.content) {
                self.log_error(
                    doc_id,
                    Phase::Convert,
                    &format!("Repair rebuild failed, skipping persist: {e}"),
                )
                .await;
                return Ok(PersistOutcome::SkippedSerialization);
            }
            SaveRequest {
                markdown: sanitized.content.clone(),
                snapshot: document::encode_snapshot(doc),
                normalized: true,
                repeat_count: sanitized.repeat_count,
                stripped_leading_placeholders: sanitized.stripped_leading_placeholders,
            }
        };

        match self.store.save(doc_id, request).await {
            Ok(receipt) => {
                self.registry
                    .set_loaded_version(doc_id, receipt.version_tag.clone())
                    .await;
                self.registry.clear_oversize_report(doc_id).await;
                self.registry.clear_bootstrap_baseline(doc_id).await;
                Ok(PersistOutcome::Saved {
                    version_tag: receipt.version_tag,
                })
            }
            Err(e) => {
                self.log_error(doc_id, Phase::Save, &format!("Save failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    /// Oversize gate: content is never written inline; at most a throttled
    /// size notice goes to the store.
    async fn report_oversize(&self, doc_id: Uuid, byte_size: usize) -> PersistOutcome {
        let due = self
            .registry
            .should_report_oversize(
                doc_id,
                byte_size,
                self.config.oversize_report_delta_bytes,
                self.config.oversize_report_interval,
            )
            .await;
        if !due {
            return PersistOutcome::Oversize {
                byte_size,
                notified: false,
            };
        }

        match self
            .store
            .notify_oversize(doc_id, byte_size as u64, "persist")
            .await
        {
            Ok(()) => {
                log::warn!("Document {doc_id} oversize: {byte_size} bytes, content not persisted");
                self.registry.record_oversize_report(doc_id, byte_size).await;
                PersistOutcome::Oversize {
                    byte_size,
                    notified: true,
                }
            }
            Err(e) => {
                self.log_error(doc_id, Phase::Notify, &format!("Oversize notice failed: {e}"))
                    .await;
                // Not recorded, so the notice retries on the next persist
                PersistOutcome::Oversize {
                    byte_size,
                    notified: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{read_content, replace_content};
    use crate::store::MemoryStore;

    fn coordinator_with(store: Arc<MemoryStore>) -> SyncCoordinator {
        SyncCoordinator::new(SyncConfig::for_testing(), store)
    }

    #[tokio::test]
    async fn test_bootstrap_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator_with(store.clone());
        let doc_id = Uuid::new_v4();
        let doc = Doc::new();

        sync.bootstrap(doc_id, &doc).await.unwrap();
        assert_eq!(read_content(&doc), "");
        assert_eq!(
            sync.registry().loaded_version(doc_id).await.as_deref(),
            Some("v0")
        );
    }

    #[tokio::test]
    async fn test_bootstrap_from_markdown_sets_baseline() {
        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "# Note\n\nBody\n", None).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        sync.bootstrap(doc_id, &doc).await.unwrap();

        assert_eq!(read_content(&doc), "# Note\n\nBody\n");
        assert_eq!(
            sync.registry().bootstrap_baseline(doc_id).await.as_deref(),
            Some("# Note\n\nBody\n")
        );
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_snapshot() {
        let source = Doc::new();
        replace_content(&source, "# From snapshot\n");
        let snapshot = document::encode_snapshot(&source);

        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "# From markdown\n", Some(snapshot)).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        sync.bootstrap(doc_id, &doc).await.unwrap();

        assert_eq!(read_content(&doc), "# From snapshot\n");
        assert_eq!(store.snapshot_fetches().await, 1);
        // Snapshot path records no baseline
        assert_eq!(sync.registry().bootstrap_baseline(doc_id).await, None);
    }

    #[tokio::test]
    async fn test_bootstrap_corrupt_markdown_skips_snapshot() {
        let source = Doc::new();
        replace_content(&source, "# Stale snapshot\n");
        let snapshot = document::encode_snapshot(&source);

        // Stored markdown is the whole body duplicated: snapshot presumed
        // corrupted too
        let block: String = (0..12)
            .map(|i| format!("line {i} of content that is long enough to matter\n"))
            .collect();
        let corrupted = block.repeat(3);
        assert!(corrupted.len() >= 1024);

        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, &corrupted, Some(snapshot)).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        sync.bootstrap(doc_id, &doc).await.unwrap();

        assert_eq!(read_content(&doc), block);
        assert_eq!(store.snapshot_fetches().await, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_empty_snapshot_falls_back_to_markdown() {
        let empty = Doc::new();
        let snapshot = document::encode_snapshot(&empty);

        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "markdown wins\n", Some(snapshot)).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        sync.bootstrap(doc_id, &doc).await.unwrap();
        assert_eq!(read_content(&doc), "markdown wins\n");
    }

    #[tokio::test]
    async fn test_bootstrap_noop_when_version_current() {
        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "stored\n", None).await; // version v1

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        replace_content(&doc, "local edits in flight\n");
        sync.registry().set_loaded_version(doc_id, "v1").await;

        sync.bootstrap(doc_id, &doc).await.unwrap();
        // Untouched: same version, local content present
        assert_eq!(read_content(&doc), "local edits in flight\n");
    }

    #[tokio::test]
    async fn test_bootstrap_version_drift_rebuilds() {
        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "remote v1\n", None).await;
        store.external_write(doc_id, "remote v2\n").await; // tag moves to v2

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        replace_content(&doc, "stale local\n");
        sync.registry().set_loaded_version(doc_id, "v1").await;

        sync.bootstrap(doc_id, &doc).await.unwrap();
        assert_eq!(read_content(&doc), "remote v2\n");
        assert_eq!(
            sync.registry().loaded_version(doc_id).await.as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_bootstrap_load_failure_is_transient() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_loads(true).await;

        let sync = coordinator_with(store.clone());
        let doc_id = Uuid::new_v4();
        let doc = Doc::new();
        assert!(sync.bootstrap(doc_id, &doc).await.is_err());

        // Next natural trigger succeeds
        store.set_fail_loads(false).await;
        sync.bootstrap(doc_id, &doc).await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_clean_path() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator_with(store.clone());
        let doc_id = Uuid::new_v4();
        let doc = Doc::new();
        replace_content(&doc, "# Clean\n\nNothing to fix.\n");

        let outcome = sync.persist(doc_id, &doc).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        assert_eq!(
            store.stored_markdown(doc_id).await.as_deref(),
            Some("# Clean\n\nNothing to fix.\n")
        );
        assert_eq!(
            sync.registry().loaded_version(doc_id).await.as_deref(),
            Some("v1")
        );
    }

    #[tokio::test]
    async fn test_persist_baseline_skip_then_save() {
        let store = Arc::new(MemoryStore::new());
        let doc_id = Uuid::new_v4();
        store.seed(doc_id, "# Note\nBody\n", None).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        sync.bootstrap(doc_id, &doc).await.unwrap();

        // First save after bootstrap: round-trip only, skipped
        let outcome = sync.persist(doc_id, &doc).await.unwrap();
        assert_eq!(outcome, PersistOutcome::SkippedBaseline);
        assert_eq!(store.save_calls().await, 0);

        // Real edit then saves
        replace_content(&doc, "# Note\nBody edited\n");
        let outcome = sync.persist(doc_id, &doc).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        assert_eq!(store.save_calls().await, 1);
    }

    #[tokio::test]
    async fn test_persist_corruption_rebuilds_live_doc() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator_with(store.clone());
        let doc_id = Uuid::new_v4();

        let block: String = (0..11)
            .map(|i| format!("paragraph {i} with plenty of distinct words inside\n"))
            .collect();
        let doc = Doc::new();
        replace_content(&doc, &block.repeat(2));

        let outcome = sync.persist(doc_id, &doc).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Saved { .. }));
        // Live document was repaired in place
        assert_eq!(read_content(&doc), block);
        assert_eq!(store.stored_markdown(doc_id).await.as_deref(), Some(block.as_str()));
    }

    #[tokio::test]
    async fn test_persist_save_failure_returns_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_saves(true).await;

        let sync = coordinator_with(store.clone());
        let doc = Doc::new();
        replace_content(&doc, "content\n");
        assert!(sync.persist(Uuid::new_v4(), &doc).await.is_err());
    }

    #[tokio::test]
    async fn test_release_removes_registry_entry() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator_with(store.clone());
        let doc_id = Uuid::new_v4();
        let doc = Doc::new();
        replace_content(&doc, "final state\n");

        sync.release(doc_id, &doc).await.unwrap();
        assert_eq!(store.stored_markdown(doc_id).await.as_deref(), Some("final state\n"));
        assert!(!sync.registry().contains(doc_id).await);
    }
}
