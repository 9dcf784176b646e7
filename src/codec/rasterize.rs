//! PDF page rasterisation via pdfium.
//!
//! pdfium is bound per call: from the configured library path, else from
//! `PDFIUM_LIB_PATH`, else from the system library search path. A missing
//! library is a per-record [`CodecError::Unavailable`], not a process error,
//! so bitmap conversions in the same batch still succeed.
//!
//! Pages are addressed 1-based, matching what users type.

use crate::error::CodecError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Renders single PDF pages to bitmaps. Blocking; call from the blocking pool.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    library: Option<PathBuf>,
    scale: f32,
}

impl PdfRasterizer {
    pub fn new(library: Option<PathBuf>, scale: f32) -> Self {
        Self { library, scale }
    }

    /// Render `page` (1-based) of the document in `bytes`.
    pub fn render_page(&self, bytes: &[u8], page: u32) -> Result<DynamicImage, CodecError> {
        if page == 0 {
            return Err(CodecError::InvalidParameter(
                "pages are 1-based, got 0".into(),
            ));
        }

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| CodecError::Decode(format!("{e:?}")))?;

        let pages = document.pages();
        let total = pages.len() as u32;
        if page > total {
            return Err(CodecError::PageOutOfRange { page, total });
        }

        let pdf_page = pages
            .get((page - 1) as u16)
            .map_err(|e| CodecError::Decode(format!("page {page}: {e:?}")))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.scale);
        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| CodecError::Encode(format!("rasterising page {page}: {e:?}")))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {}/{} → {}x{} px",
            page,
            total,
            image.width(),
            image.height()
        );
        Ok(image)
    }

    fn bind(&self) -> Result<Pdfium, CodecError> {
        let explicit = self
            .library
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            }
            Some(path) => Pdfium::bind_to_library(&path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| CodecError::Unavailable(format!("pdfium library: {e}")))?;

        Ok(Pdfium::new(bindings))
    }
}
