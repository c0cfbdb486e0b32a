//! Yrs document adapter and the markdown serializer seam.
//!
//! The live collaborative document is a `yrs::Doc` whose root text
//! `"content"` holds the markdown body. All wholesale mutations (clear,
//! replace, snapshot apply) run inside a single write transaction so a
//! concurrent local edit can never interleave mid-replace.
//!
//! The [`MarkdownCodec`] trait is the boundary to the markdown ⇄ document
//! serializer. The bundled [`TextCodec`] is the plain-text implementation;
//! hosts with a richer document model plug their own codec in.

use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, WriteTxn};

/// Root text name inside the Yrs document.
pub const CONTENT_ROOT: &str = "content";

/// Serializer failure.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// Document → markdown serialization failed
    Serialize(String),
    /// Markdown → document conversion failed
    Convert(String),
    /// CRDT snapshot bytes did not decode
    SnapshotDecode(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Serialize(e) => write!(f, "Serialization failed: {e}"),
            CodecError::Convert(e) => write!(f, "Markdown conversion failed: {e}"),
            CodecError::SnapshotDecode(e) => write!(f, "Snapshot decode failed: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Markdown ⇄ document serializer contract.
///
/// `to_markdown` may fail for exotic document states; the persist
/// coordinator then falls back to [`MarkdownCodec::extract_plain_text`].
pub trait MarkdownCodec: Send + Sync {
    /// Serialize the document to markdown.
    fn to_markdown(&self, doc: &Doc) -> Result<String, CodecError>;

    /// Replace the document's content with the given markdown, atomically.
    fn apply_markdown(&self, doc: &Doc, markdown: &str) -> Result<(), CodecError>;

    /// Best-effort plain-text extraction, used when `to_markdown` fails.
    fn extract_plain_text(&self, doc: &Doc) -> Result<String, CodecError>;
}

/// Plain-text codec over the root text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl MarkdownCodec for TextCodec {
    fn to_markdown(&self, doc: &Doc) -> Result<String, CodecError> {
        Ok(read_content(doc))
    }

    fn apply_markdown(&self, doc: &Doc, markdown: &str) -> Result<(), CodecError> {
        replace_content(doc, markdown);
        Ok(())
    }

    fn extract_plain_text(&self, doc: &Doc) -> Result<String, CodecError> {
        Ok(read_content(doc))
    }
}

/// Read the full root text.
pub fn read_content(doc: &Doc) -> String {
    let txn = doc.transact();
    match txn.get_text(CONTENT_ROOT) {
        Some(text) => text.get_string(&txn),
        None => String::new(),
    }
}

/// Replace the root text in one transaction: remove everything, insert the
/// new body. Single suspension-free mutation, atomic w.r.t. local edits.
pub fn replace_content(doc: &Doc, markdown: &str) {
    let mut txn = doc.transact_mut();
    let text = txn.get_or_insert_text(CONTENT_ROOT);
    let len = text.len(&txn);
    if len > 0 {
        text.remove_range(&mut txn, 0, len);
    }
    if !markdown.is_empty() {
        text.insert(&mut txn, 0, markdown);
    }
}

/// Clear the root text.
pub fn clear(doc: &Doc) {
    replace_content(doc, "");
}

/// Encode the full document state as a v1 update (snapshot).
pub fn encode_snapshot(doc: &Doc) -> Vec<u8> {
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}

/// Clear the document and apply a snapshot in one transaction.
pub fn apply_snapshot(doc: &Doc, snapshot: &[u8]) -> Result<(), CodecError> {
    let update =
        Update::decode_v1(snapshot).map_err(|e| CodecError::SnapshotDecode(e.to_string()))?;
    let mut txn = doc.transact_mut();
    let text = txn.get_or_insert_text(CONTENT_ROOT);
    let len = text.len(&txn);
    if len > 0 {
        text.remove_range(&mut txn, 0, len);
    }
    let _ = txn.apply_update(update);
    Ok(())
}

/// Decode a snapshot into a scratch document and report whether it carries
/// non-blank content. Never touches the live document.
pub fn probe_snapshot(snapshot: &[u8]) -> Result<bool, CodecError> {
    let update =
        Update::decode_v1(snapshot).map_err(|e| CodecError::SnapshotDecode(e.to_string()))?;
    let scratch = Doc::new();
    {
        let mut txn = scratch.transact_mut();
        let _ = txn.apply_update(update);
    }
    Ok(!read_content(&scratch).trim().is_empty())
}
