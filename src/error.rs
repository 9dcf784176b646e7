//! Error types for the pixbatch library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **Operation-level**: the requested action cannot be
//!   performed at all (parameter out of range, index out of bounds, a run is
//!   already in flight, a file was rejected at intake, the archive could not
//!   be built). Returned as `Err(PipelineError)` from [`crate::Pipeline`]
//!   methods and from intake/packaging helpers.
//!
//! * [`CodecError`]: **Per-record**: one file failed to transform (corrupt
//!   payload, page out of range, encoder failure) but every sibling record is
//!   unaffected. Stored inside [`crate::record::RecordState::Failed`] so callers
//!   can inspect partial success rather than losing the whole batch to one bad
//!   file.
//!
//! No error is fatal to the process: a failed record can always be retried by
//! running the batch again.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by pipeline operations.
///
/// Record-level codec failures use [`CodecError`] and are stored in the
/// record rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Parameter errors ──────────────────────────────────────────────────
    /// A numeric parameter was outside its accepted range. The previous
    /// valid value is retained.
    #[error("Invalid parameter '{name}': {detail}")]
    InvalidParameter { name: &'static str, detail: String },

    /// The parameter does not apply to this workflow (e.g. quality on resize).
    #[error("Parameter '{name}' does not apply to the {workflow} workflow")]
    ParameterNotApplicable {
        name: &'static str,
        workflow: &'static str,
    },

    /// Index-addressed operation on a record that does not exist.
    #[error("Record index {index} is out of bounds (batch has {len} records)")]
    IndexOutOfBounds { index: usize, len: usize },

    // ── Run errors ────────────────────────────────────────────────────────
    /// A run for the current batch still has unsettled adapter calls.
    #[error("A run is already in progress for this batch")]
    RunInProgress,

    // ── Intake errors ─────────────────────────────────────────────────────
    /// File media type is not accepted by the workflow. The file never
    /// enters the batch.
    #[error("File type not supported for '{name}': {media_type}\nAccepted types: {accepted}")]
    UnsupportedMediaType {
        name: String,
        media_type: String,
        accepted: String,
    },

    /// File exceeds the configured per-file size ceiling.
    #[error("File '{name}' is {size} bytes; the limit is {limit} bytes")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// Input file could not be read from disk.
    #[error("Failed to read input file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// Archive generation failed. Already-produced artifacts remain
    /// individually downloadable.
    #[error("Failed to build archive: {0}")]
    PackagingFailed(String),

    /// The packager was invoked with no entries.
    #[error("Nothing to package: no artifacts are available")]
    NothingToPackage,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn invalid(name: &'static str, detail: impl Into<String>) -> Self {
        PipelineError::InvalidParameter {
            name,
            detail: detail.into(),
        }
    }
}

/// A non-fatal failure for a single record.
///
/// Stored in [`crate::record::RecordState::Failed`]. The run continues for
/// every other record.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum CodecError {
    /// Parameter refused by the adapter (quality below the floor, dimension
    /// above the ceiling, page 0).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Requested page does not exist in the document (1-based).
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// The adapter does not handle this media type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Source bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Output could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A required native resource (pdfium library, pixmap allocation) is
    /// unavailable.
    #[error("codec unavailable: {0}")]
    Unavailable(String),

    /// The blocking codec task panicked or was cancelled.
    #[error("codec task failed: {0}")]
    TaskFailed(String),
}
