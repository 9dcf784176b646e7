//! Resize adapter: scale a bitmap to exact target dimensions.
//!
//! The adapter always honours the requested width and height; keeping the
//! aspect ratio is the job of whoever chose them (see
//! [`crate::params::ResizeParams`]). The output keeps the source's format.

use super::encode::{decode, encode};
use super::{run_blocking, wrong_workflow, CodecAdapter, CodecJob};
use crate::error::CodecError;
use crate::naming::output_name;
use crate::output::Artifact;
use crate::params::{Dimensions, OutputFormat, ProcessingParameters, Quality, Workflow};
use crate::record::Outcome;
use crate::source::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::imageops::FilterType;

#[derive(Debug, Clone)]
pub struct ResizeAdapter {
    quality: Quality,
}

impl ResizeAdapter {
    pub fn new(quality: Quality) -> Self {
        Self { quality }
    }
}

impl CodecAdapter for ResizeAdapter {
    fn process(&self, job: CodecJob) -> BoxFuture<'static, Outcome> {
        let quality = self.quality;
        async move {
            let target = match job.params {
                ProcessingParameters::Resize(r) => r.dimensions,
                other => return Err(wrong_workflow(Workflow::Resize, &other)),
            };
            target
                .validate()
                .map_err(|e| CodecError::InvalidParameter(e.to_string()))?;
            run_blocking(move || resize(&job.source, target, quality)).await
        }
        .boxed()
    }
}

fn resize(source: &SourceFile, target: Dimensions, quality: Quality) -> Result<Artifact, CodecError> {
    let format = OutputFormat::from_mime_type(source.media_type())
        .filter(|f| *f != OutputFormat::Svg)
        .ok_or_else(|| CodecError::UnsupportedMediaType(source.media_type().to_string()))?;

    let img = decode(source.bytes())?;
    let resized = img.resize_exact(target.width, target.height, FilterType::Lanczos3);
    let bytes = encode(&resized, format, quality)?;

    Ok(Artifact::new(
        output_name(Workflow::Resize, source.name(), None),
        format.mime_type(),
        bytes,
    ))
}
