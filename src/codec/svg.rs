//! SVG export adapter: render an SVG document to PNG or JPEG, or pass the
//! validated text through unchanged.
//!
//! The raster size is the document's intrinsic size. A root element that
//! declares neither `width`/`height` nor a `viewBox` has no usable size and
//! is rendered at the configured fallback (square). Raster output always
//! sits on an opaque white background.

use super::encode::encode;
use super::{run_blocking, wrong_workflow, CodecAdapter, CodecJob};
use crate::error::CodecError;
use crate::naming::output_name;
use crate::output::Artifact;
use crate::params::{OutputFormat, ProcessingParameters, Quality, Workflow, MAX_DIMENSION};
use crate::record::Outcome;
use crate::source::SourceFile;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::{DynamicImage, RgbaImage};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

static ROOT_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<svg\b[^>]*>").unwrap());
static SIZE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\s(width|height|viewBox)\s*=\s*["'][^"']*[0-9]"#).unwrap());

#[derive(Clone)]
pub struct SvgAdapter {
    fallback_size: u32,
    quality: Quality,
    fonts: Arc<OnceCell<Arc<usvg::fontdb::Database>>>,
}

impl std::fmt::Debug for SvgAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvgAdapter")
            .field("fallback_size", &self.fallback_size)
            .field("quality", &self.quality)
            .field("fonts_loaded", &self.fonts.get().is_some())
            .finish()
    }
}

impl SvgAdapter {
    pub fn new(fallback_size: u32, quality: Quality) -> Self {
        Self {
            fallback_size,
            quality,
            fonts: Arc::new(OnceCell::new()),
        }
    }
}

impl CodecAdapter for SvgAdapter {
    fn process(&self, job: CodecJob) -> BoxFuture<'static, Outcome> {
        let this = self.clone();
        async move {
            let format = match job.params {
                ProcessingParameters::SvgExport { format } => format,
                other => return Err(wrong_workflow(Workflow::SvgExport, &other)),
            };
            run_blocking(move || this.export(&job.source, format)).await
        }
        .boxed()
    }
}

impl SvgAdapter {
    fn export(&self, source: &SourceFile, format: OutputFormat) -> Result<Artifact, CodecError> {
        let name = output_name(Workflow::SvgExport, source.name(), Some(format));
        let tree = self.parse(source.bytes())?;

        match format {
            OutputFormat::Svg => Ok(Artifact::new(
                name,
                format.mime_type(),
                source.shared_bytes(),
            )),
            OutputFormat::Png | OutputFormat::Jpeg => {
                let (width, height) = self.raster_size(source.bytes(), &tree)?;
                let img = render(&tree, width, height)?;
                let bytes = encode(&img, format, self.quality)?;
                Ok(Artifact::new(name, format.mime_type(), bytes))
            }
            other => Err(CodecError::InvalidParameter(format!(
                "SVG export supports png, jpeg or svg, got {other}"
            ))),
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<usvg::Tree, CodecError> {
        let fontdb = self.fonts.get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            debug!("Loaded {} font faces for SVG text", db.len());
            Arc::new(db)
        });
        let opts = usvg::Options {
            fontdb: Arc::clone(fontdb),
            ..Default::default()
        };
        usvg::Tree::from_data(bytes, &opts).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn raster_size(&self, bytes: &[u8], tree: &usvg::Tree) -> Result<(u32, u32), CodecError> {
        let size = tree.size();
        let (w, h) = (size.width(), size.height());
        if !declares_size(bytes) || !w.is_finite() || !h.is_finite() || w <= 0.0 || h <= 0.0 {
            return Ok((self.fallback_size, self.fallback_size));
        }

        let (width, height) = ((w.ceil() as u32).max(1), (h.ceil() as u32).max(1));
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CodecError::InvalidParameter(format!(
                "SVG size {width}x{height} exceeds {MAX_DIMENSION} px"
            )));
        }
        Ok((width, height))
    }
}

/// Whether the root `<svg>` element carries a numeric size or viewBox.
fn declares_size(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    ROOT_TAG_RE
        .find(&text)
        .is_some_and(|tag| SIZE_ATTR_RE.is_match(tag.as_str()))
}

fn render(tree: &usvg::Tree, width: u32, height: u32) -> Result<DynamicImage, CodecError> {
    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| CodecError::Unavailable(format!("cannot allocate {width}x{height} pixmap")))?;
    pixmap.fill(resvg::tiny_skia::Color::WHITE);

    let sx = width as f32 / tree.size().width();
    let sy = height as f32 / tree.size().height();
    resvg::render(
        tree,
        resvg::tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );

    // Opaque background, so premultiplied and straight alpha coincide.
    RgbaImage::from_raw(width, height, pixmap.data().to_vec())
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| CodecError::Encode("pixmap buffer size mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode::{decode, dimensions};
    use crate::params::ItemParameter;

    const RED_SQUARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="30" height="20">
        <rect x="0" y="0" width="15" height="20" fill="red"/>
    </svg>"#;

    fn job(text: &str, format: OutputFormat) -> CodecJob {
        CodecJob {
            source: Arc::new(SourceFile::svg_text(text)),
            params: ProcessingParameters::SvgExport { format },
            item: ItemParameter::default(),
        }
    }

    fn adapter() -> SvgAdapter {
        SvgAdapter::new(400, Quality::REENCODE)
    }

    #[tokio::test]
    async fn renders_at_intrinsic_size_on_white() {
        let artifact = adapter()
            .process(job(RED_SQUARE, OutputFormat::Png))
            .await
            .unwrap();
        assert_eq!(artifact.name(), "converted.png");
        assert_eq!(dimensions(artifact.bytes()).unwrap(), (30, 20));

        let img = decode(artifact.bytes()).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(2, 10).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(28, 10).0, [255, 255, 255, 255]);
    }

    #[tokio::test]
    async fn undeclared_size_uses_fallback() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><circle cx="5" cy="5" r="4"/></svg>"#;
        let artifact = adapter()
            .process(job(svg, OutputFormat::Jpeg))
            .await
            .unwrap();
        assert_eq!(artifact.name(), "converted.jpeg");
        assert_eq!(dimensions(artifact.bytes()).unwrap(), (400, 400));
    }

    #[tokio::test]
    async fn svg_target_passes_text_through() {
        let artifact = adapter()
            .process(job(RED_SQUARE, OutputFormat::Svg))
            .await
            .unwrap();
        assert_eq!(artifact.name(), "converted.svg");
        assert_eq!(artifact.bytes(), RED_SQUARE.as_bytes());
    }

    #[tokio::test]
    async fn malformed_svg_fails() {
        let err = adapter()
            .process(job("<svg><unclosed", OutputFormat::Svg))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn size_detection_reads_root_only() {
        assert!(declares_size(br#"<svg width="10" height="10"/>"#));
        assert!(declares_size(br#"<svg viewBox="0 0 5 5"/>"#));
        assert!(!declares_size(br#"<svg><rect width="10" height="10"/></svg>"#));
    }
}
