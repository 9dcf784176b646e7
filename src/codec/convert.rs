//! Convert adapter: bitmap or PDF page → target raster format.
//!
//! PDF sources are rasterised one page at a time (the record's page
//! selection, default 1); every other accepted input is decoded directly.

use super::encode::{decode, encode};
use super::rasterize::PdfRasterizer;
use super::{run_blocking, wrong_workflow, CodecAdapter, CodecJob};
use crate::error::CodecError;
use crate::naming::output_name;
use crate::output::Artifact;
use crate::params::{ItemParameter, OutputFormat, ProcessingParameters, Quality, Workflow};
use crate::record::Outcome;
use crate::source::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConvertAdapter {
    quality: Quality,
    pdf: Arc<PdfRasterizer>,
}

impl ConvertAdapter {
    pub fn new(quality: Quality, pdf: PdfRasterizer) -> Self {
        Self {
            quality,
            pdf: Arc::new(pdf),
        }
    }
}

impl CodecAdapter for ConvertAdapter {
    fn process(&self, job: CodecJob) -> BoxFuture<'static, Outcome> {
        let quality = self.quality;
        let pdf = Arc::clone(&self.pdf);
        async move {
            let format = match job.params {
                ProcessingParameters::Convert { format } if format != OutputFormat::Svg => format,
                ProcessingParameters::Convert { format } => {
                    return Err(CodecError::InvalidParameter(format!(
                        "cannot convert a bitmap to {format}"
                    )))
                }
                other => return Err(wrong_workflow(Workflow::Convert, &other)),
            };
            run_blocking(move || convert(&job.source, job.item, format, quality, &pdf)).await
        }
        .boxed()
    }
}

fn convert(
    source: &SourceFile,
    item: ItemParameter,
    format: OutputFormat,
    quality: Quality,
    pdf: &PdfRasterizer,
) -> Result<Artifact, CodecError> {
    let img = if source.is_paginated() {
        pdf.render_page(source.bytes(), item.page.unwrap_or(1))?
    } else {
        decode(source.bytes())?
    };
    let bytes = encode(&img, format, quality)?;

    Ok(Artifact::new(
        output_name(Workflow::Convert, source.name(), Some(format)),
        format.mime_type(),
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode::dimensions;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn adapter() -> ConvertAdapter {
        ConvertAdapter::new(
            Quality::REENCODE,
            PdfRasterizer::new(Some("/nonexistent/libpdfium.so".into()), 2.0),
        )
    }

    fn job(source: SourceFile, format: OutputFormat) -> CodecJob {
        let item = ItemParameter::for_source(&source);
        CodecJob {
            source: Arc::new(source),
            params: ProcessingParameters::Convert { format },
            item,
        }
    }

    fn transparent_png() -> SourceFile {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 6, Rgba([0, 0, 255, 0])));
        let bytes = encode(&img, OutputFormat::Png, Quality::REENCODE).unwrap();
        SourceFile::new("icon.png", "image/png", bytes)
    }

    #[tokio::test]
    async fn png_to_jpeg_renames_and_flattens() {
        let artifact = adapter()
            .process(job(transparent_png(), OutputFormat::Jpeg))
            .await
            .unwrap();
        assert_eq!(artifact.name(), "icon.jpeg");
        assert_eq!(artifact.media_type(), "image/jpeg");

        let back = decode(artifact.bytes()).unwrap().to_rgb8();
        let [r, g, b] = back.get_pixel(4, 3).0;
        assert!(r > 240 && g > 240 && b > 240, "expected white, got {r},{g},{b}");
    }

    #[tokio::test]
    async fn png_to_webp_and_gif() {
        for format in [OutputFormat::Webp, OutputFormat::Gif] {
            let artifact = adapter()
                .process(job(transparent_png(), format))
                .await
                .unwrap();
            assert_eq!(artifact.media_type(), format.mime_type());
            assert_eq!(dimensions(artifact.bytes()).unwrap(), (8, 6));
        }
    }

    #[tokio::test]
    async fn svg_target_is_refused() {
        let err = adapter()
            .process(job(transparent_png(), OutputFormat::Svg))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn pdf_without_library_fails_only_that_record() {
        let src = SourceFile::new("doc.pdf", "application/pdf", b"%PDF-1.4 broken".to_vec());
        let err = adapter().process(job(src, OutputFormat::Png)).await.unwrap_err();
        assert!(matches!(err, CodecError::Unavailable(_)), "{err:?}");
    }
}
