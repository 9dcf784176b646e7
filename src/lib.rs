//! # pixbatch
//!
//! Batch image transformation: compression, resizing, format conversion
//! (including PDF pages) and SVG export, with per-file state tracking and
//! single-download packaging.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Intake    type / size checks, media type sniffing
//!  ├─ 2. Batch     one record per file, stable identity, per-item page
//!  ├─ 3. Params    one shared value; edits mark the batch stale
//!  ├─ 4. Run       concurrent codec calls (spawn_blocking), per-record
//!  │               failure isolation, results applied by record identity
//!  └─ 5. Download  one artifact verbatim, or a ZIP of all of them
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixbatch::{source, Pipeline, PipelineConfig, Quality, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(Workflow::Compress, PipelineConfig::default());
//!     let photo = source::read_source("photo.jpg").await?;
//!     let rejected = pipeline.load([photo]);
//!     assert!(rejected.is_empty());
//!
//!     pipeline.set_quality(Quality::from_percent(60)?)?;
//!     let summary = pipeline.run_all().await?;
//!     eprintln!("{}/{} compressed", summary.succeeded, summary.total);
//!
//!     if let Some(download) = pipeline.download_all().await? {
//!         Pipeline::save_download(&download, ".").await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pixbatch` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pixbatch = { version = "0.1", default-features = false }
//! ```
//!
//! ## PDF support
//!
//! PDF pages are rasterised with pdfium, bound at runtime. Point
//! `PDFIUM_LIB_PATH` (or [`PipelineConfig::pdfium_library`]) at the shared
//! library if it is not on the system search path. Without it, PDF records
//! fail individually and every other record still converts.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod output;
pub mod params;
pub mod progress;
pub mod record;
pub mod source;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use codec::{adapter_for, CodecAdapter, CodecJob};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{CodecError, PipelineError};
pub use orchestrator::Pipeline;
pub use output::{Artifact, ArtifactInfo, BatchTotals, Download, RunSummary};
pub use params::{
    AspectRatio, Dimensions, ItemParameter, OutputFormat, ProcessingParameters, Quality,
    ResizeParams, Workflow,
};
pub use progress::{NoopObserver, PipelineObserver, ProgressCallback};
pub use record::{ProcessingRecord, RecordId, RecordState, RecordView, Status};
pub use source::SourceFile;
