//! Codec adapters: the transformation behind each workflow.
//!
//! An adapter takes one source file plus the batch parameters and settles
//! exactly once with either an [`Artifact`] or a [`CodecError`]. The
//! orchestrator never looks inside; it only dispatches jobs and applies the
//! outcomes. Tests substitute scripted adapters through the same trait.
//!
//! ## Threading
//!
//! Decoding, resampling and encoding are CPU-bound, and pdfium is a blocking
//! C library. Every adapter therefore moves its work onto the blocking pool
//! with [`tokio::task::spawn_blocking`] and only awaits the join handle, so
//! the runtime's worker threads stay free to drive the other jobs.

pub mod compress;
pub mod convert;
pub mod encode;
pub mod rasterize;
pub mod resize;
pub mod svg;

use crate::config::PipelineConfig;
use crate::error::CodecError;
use crate::output::Artifact;
use crate::params::{ItemParameter, ProcessingParameters, Workflow};
use crate::record::Outcome;
use crate::source::SourceFile;
use futures::future::BoxFuture;
use std::sync::Arc;

pub use compress::CompressAdapter;
pub use convert::ConvertAdapter;
pub use rasterize::PdfRasterizer;
pub use resize::ResizeAdapter;
pub use svg::SvgAdapter;

/// Everything one adapter call needs, captured when the run is dispatched.
#[derive(Debug, Clone)]
pub struct CodecJob {
    pub source: Arc<SourceFile>,
    pub params: ProcessingParameters,
    pub item: ItemParameter,
}

/// A transformation from one source file to one artifact.
///
/// The returned future must settle exactly once and must not borrow the
/// adapter, so the orchestrator can hold many of them in flight.
pub trait CodecAdapter: Send + Sync {
    fn process(&self, job: CodecJob) -> BoxFuture<'static, Outcome>;
}

/// The production adapter for `workflow`, configured from `config`.
pub fn adapter_for(workflow: Workflow, config: &PipelineConfig) -> Arc<dyn CodecAdapter> {
    match workflow {
        Workflow::Compress => Arc::new(CompressAdapter::new(config.compress_max_edge)),
        Workflow::Resize => Arc::new(ResizeAdapter::new(config.reencode_quality)),
        Workflow::Convert => Arc::new(ConvertAdapter::new(
            config.reencode_quality,
            PdfRasterizer::new(config.pdfium_library.clone(), config.pdf_render_scale),
        )),
        Workflow::SvgExport => Arc::new(SvgAdapter::new(
            config.svg_fallback_size,
            config.reencode_quality,
        )),
    }
}

/// Run CPU-bound codec work on the blocking pool.
pub(crate) async fn run_blocking<F>(work: F) -> Outcome
where
    F: FnOnce() -> Result<Artifact, CodecError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CodecError::TaskFailed(e.to_string()))?
}

/// Error for parameters belonging to another workflow's adapter.
pub(crate) fn wrong_workflow(adapter: Workflow, params: &ProcessingParameters) -> CodecError {
    CodecError::InvalidParameter(format!(
        "{} adapter received {} parameters",
        adapter,
        params.workflow()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(params: ProcessingParameters) -> CodecJob {
        CodecJob {
            source: Arc::new(SourceFile::new("a.png", "image/png", vec![0u8; 4])),
            params,
            item: ItemParameter::default(),
        }
    }

    #[tokio::test]
    async fn adapters_reject_foreign_parameters() {
        let config = PipelineConfig::default();
        for (workflow, foreign) in [
            (Workflow::Compress, Workflow::Resize),
            (Workflow::Resize, Workflow::Convert),
            (Workflow::Convert, Workflow::SvgExport),
            (Workflow::SvgExport, Workflow::Compress),
        ] {
            let adapter = adapter_for(workflow, &config);
            let err = adapter
                .process(job(foreign.default_parameters()))
                .await
                .unwrap_err();
            assert!(
                matches!(err, CodecError::InvalidParameter(_)),
                "{workflow}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn panicking_work_becomes_task_failure() {
        let err = run_blocking(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, CodecError::TaskFailed(_)));
    }
}
