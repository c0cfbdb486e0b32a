//! # quill-sync — Collaborative document synchronization coordinator
//!
//! Keeps two representations of the same document consistent under
//! concurrency: the live CRDT that many clients edit, and the canonical
//! markdown record in the store. The hard part is not either side alone,
//! it is the round-trip: sessions attach and detach unpredictably,
//! editor serialization is lossy, and a naive save-then-reload cycle can
//! feed a client its own normalized output forever.
//!
//! ## Architecture
//!
//! ```text
//! session attach ──► bootstrap ──► RecordStore.load ──► sanitize ──► Yrs Doc
//!                        │                                             │
//!                        └── shared in-flight future per document ─────┤
//!                                                                      │
//! edit debounce ───► persist ──► serialize ──► sanitize ──► gate ──► RecordStore.save
//! last disconnect ─► release ─── (final flush, then registry cleanup)
//! ```
//!
//! ## Modules
//!
//! - [`sanitize`] — pure markdown corruption repair (repetition collapse,
//!   placeholder trim)
//! - [`registry`] — per-document session bookkeeping
//! - [`coordinator`] — bootstrap/persist coordination
//! - [`document`] — Yrs adapter and the markdown serializer seam
//! - [`store`] — persistence contract, RocksDB and in-memory backends
//! - [`config`] — all tunables in one place

pub mod config;
pub mod coordinator;
pub mod document;
pub mod registry;
pub mod sanitize;
pub mod store;

// Re-exports for convenience
pub use config::SyncConfig;
pub use coordinator::{BootstrapError, PersistOutcome, SyncCoordinator};
pub use document::{CodecError, MarkdownCodec, TextCodec};
pub use registry::{OversizeReport, Phase, SessionRegistry};
pub use sanitize::{sanitize, sanitize_with, Sanitization, SanitizeLimits};
pub use store::{
    MemoryStore, PersistedRecord, RecordStore, RocksRecordStore, RocksStoreConfig, SaveReceipt,
    SaveRequest, StoreError,
};
