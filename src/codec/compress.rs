//! Compress adapter: re-encode a bitmap in its own format at a lower quality.
//!
//! Images whose longest edge exceeds the configured cap are scaled down
//! proportionally first (never up). When re-encoding an image that was not
//! downscaled would make it *larger*, the source bytes are kept: the
//! artifact is never worse than the original.

use super::encode::{decode, encode};
use super::{run_blocking, wrong_workflow, CodecAdapter, CodecJob};
use crate::error::CodecError;
use crate::naming::output_name;
use crate::output::Artifact;
use crate::params::{OutputFormat, ProcessingParameters, Quality, Workflow};
use crate::record::Outcome;
use crate::source::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::imageops::FilterType;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CompressAdapter {
    max_edge: u32,
}

impl CompressAdapter {
    pub fn new(max_edge: u32) -> Self {
        Self { max_edge }
    }
}

impl CodecAdapter for CompressAdapter {
    fn process(&self, job: CodecJob) -> BoxFuture<'static, Outcome> {
        let max_edge = self.max_edge;
        async move {
            let quality = match job.params {
                ProcessingParameters::Compress { quality } => quality,
                other => return Err(wrong_workflow(Workflow::Compress, &other)),
            };
            run_blocking(move || compress(&job.source, quality, max_edge)).await
        }
        .boxed()
    }
}

fn compress(source: &SourceFile, quality: Quality, max_edge: u32) -> Result<Artifact, CodecError> {
    let format = match OutputFormat::from_mime_type(source.media_type()) {
        Some(f @ (OutputFormat::Jpeg | OutputFormat::Png | OutputFormat::Webp)) => f,
        _ => {
            return Err(CodecError::UnsupportedMediaType(
                source.media_type().to_string(),
            ))
        }
    };

    let mut img = decode(source.bytes())?;
    let downscaled = img.width().max(img.height()) > max_edge;
    if downscaled {
        debug!(
            "{}: {}x{} exceeds {} px, scaling down",
            source.name(),
            img.width(),
            img.height(),
            max_edge
        );
        img = img.resize(max_edge, max_edge, FilterType::Lanczos3);
    }

    let encoded = encode(&img, format, quality)?;
    let name = output_name(Workflow::Compress, source.name(), None);
    if !downscaled && encoded.len() as u64 >= source.size() {
        debug!(
            "{}: re-encode is not smaller ({} ≥ {} bytes), keeping source",
            source.name(),
            encoded.len(),
            source.size()
        );
        return Ok(Artifact::new(name, format.mime_type(), source.shared_bytes()));
    }
    Ok(Artifact::new(name, format.mime_type(), encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode::dimensions;
    use crate::params::ItemParameter;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Arc;

    fn jpeg_source(name: &str, width: u32, height: u32) -> SourceFile {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let bytes = encode(&img, OutputFormat::Jpeg, Quality::new(1.0).unwrap()).unwrap();
        SourceFile::new(name, "image/jpeg", bytes)
    }

    fn job(source: SourceFile, quality: f32) -> CodecJob {
        CodecJob {
            source: Arc::new(source),
            params: ProcessingParameters::Compress {
                quality: Quality::new(quality).unwrap(),
            },
            item: ItemParameter::default(),
        }
    }

    #[tokio::test]
    async fn output_keeps_format_and_prefixes_name() {
        let adapter = CompressAdapter::new(4096);
        let artifact = adapter
            .process(job(jpeg_source("photo.jpg", 64, 48), 0.5))
            .await
            .unwrap();
        assert_eq!(artifact.name(), "compressed_photo.jpg");
        assert_eq!(artifact.media_type(), "image/jpeg");
        assert_eq!(dimensions(artifact.bytes()).unwrap(), (64, 48));
    }

    #[tokio::test]
    async fn lower_quality_is_not_larger() {
        let adapter = CompressAdapter::new(4096);
        let src = jpeg_source("a.jpg", 80, 80);
        let high = adapter.process(job(src.clone(), 0.8)).await.unwrap();
        let low = adapter.process(job(src.clone(), 0.5)).await.unwrap();
        assert!(low.size() <= high.size());
        assert!(high.size() < src.size(), "{} >= {}", high.size(), src.size());
    }

    #[tokio::test]
    async fn webp_shrinks_as_quality_drops() {
        let mut seed: u32 = 0x9e37_79b9;
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(128, 128, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            Rgb([(x * 2) as u8 ^ (seed & 0x3f) as u8, (y * 2) as u8, (seed >> 8) as u8])
        }));
        let bytes = encode(&img, OutputFormat::Webp, Quality::new(1.0).unwrap()).unwrap();
        let src = SourceFile::new("noise.webp", "image/webp", bytes);

        let adapter = CompressAdapter::new(4096);
        let high = adapter.process(job(src.clone(), 0.8)).await.unwrap();
        let low = adapter.process(job(src.clone(), 0.2)).await.unwrap();

        assert_eq!(high.name(), "compressed_noise.webp");
        assert_eq!(high.media_type(), "image/webp");
        assert!(high.size() < src.size(), "{} >= {}", high.size(), src.size());
        assert!(low.size() < high.size(), "{} >= {}", low.size(), high.size());
        assert_eq!(dimensions(low.bytes()).unwrap(), (128, 128));
    }

    #[tokio::test]
    async fn longest_edge_is_capped() {
        let adapter = CompressAdapter::new(32);
        let artifact = adapter
            .process(job(jpeg_source("wide.jpg", 128, 64), 0.8))
            .await
            .unwrap();
        assert_eq!(dimensions(artifact.bytes()).unwrap(), (32, 16));
    }

    #[tokio::test]
    async fn corrupt_input_fails() {
        let adapter = CompressAdapter::new(4096);
        let src = SourceFile::new("bad.jpg", "image/jpeg", b"\xff\xd8garbage".to_vec());
        let err = adapter.process(job(src, 0.8)).await.unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[tokio::test]
    async fn gif_is_not_compressible() {
        let adapter = CompressAdapter::new(4096);
        let src = SourceFile::new("a.gif", "image/gif", b"GIF89a".to_vec());
        let err = adapter.process(job(src, 0.8)).await.unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedMediaType(_)));
    }
}
