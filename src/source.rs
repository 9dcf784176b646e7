//! Source files and intake validation.
//!
//! A [`SourceFile`] is immutable once built: name, declared media type and
//! the raw payload. Files are checked against the workflow's accepted types
//! and the per-file size ceiling *before* they enter a batch; a rejected file
//! never becomes a record.
//!
//! The declared media type is normally supplied by whoever picked the file.
//! When reading from disk we sniff it from magic bytes first (`%PDF`, image
//! signatures, `<svg`) and fall back to the extension, so a mislabelled file
//! is classified by what it contains.

use crate::error::PipelineError;
use crate::params::Workflow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// An immutable user-supplied file.
#[derive(Clone)]
pub struct SourceFile {
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Wrap an SVG document typed or pasted by the user.
    pub fn svg_text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::new("converted.svg", "image/svg+xml", text.into_bytes())
    }

    /// Build a source whose media type is sniffed from its content and name.
    pub fn sniffed(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        let media_type = sniff_media_type(&name, &bytes)
            .unwrap_or("application/octet-stream")
            .to_string();
        Self {
            name,
            media_type,
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Paginated sources carry a per-record page selection.
    pub fn is_paginated(&self) -> bool {
        self.media_type == "application/pdf"
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Guess the media type from magic bytes, then from the file extension.
pub fn sniff_media_type(name: &str, bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    if let Ok(format) = image::guess_format(bytes) {
        if let Some(mime) = bitmap_mime(format) {
            return Some(mime);
        }
    }
    if looks_like_svg(bytes) {
        return Some("image/svg+xml");
    }

    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "svg" => Some("image/svg+xml"),
        other => image::ImageFormat::from_extension(other).and_then(bitmap_mime),
    }
}

fn bitmap_mime(format: image::ImageFormat) -> Option<&'static str> {
    match format {
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

/// Check one file against the workflow's accepted types and the size ceiling.
pub fn admit(
    workflow: Workflow,
    source: SourceFile,
    max_file_bytes: u64,
) -> Result<SourceFile, PipelineError> {
    if source.size() > max_file_bytes {
        return Err(PipelineError::FileTooLarge {
            name: source.name,
            size: source.bytes.len() as u64,
            limit: max_file_bytes,
        });
    }
    if !workflow.accepts(&source.media_type) {
        return Err(PipelineError::UnsupportedMediaType {
            name: source.name,
            media_type: source.media_type,
            accepted: workflow.accepted_media_types().join(", "),
        });
    }
    Ok(source)
}

/// Split a selection into admitted sources and per-file rejections.
///
/// Order of the admitted files is preserved.
pub fn admit_all(
    workflow: Workflow,
    sources: impl IntoIterator<Item = SourceFile>,
    max_file_bytes: u64,
) -> (Vec<SourceFile>, Vec<PipelineError>) {
    let mut admitted = Vec::new();
    let mut rejected = Vec::new();
    for source in sources {
        match admit(workflow, source, max_file_bytes) {
            Ok(s) => admitted.push(s),
            Err(e) => rejected.push(e),
        }
    }
    (admitted, rejected)
}

/// Read a file from disk into a [`SourceFile`] with a sniffed media type.
pub async fn read_source(path: impl AsRef<Path>) -> Result<SourceFile, PipelineError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());

    let source = SourceFile::sniffed(name, bytes);
    debug!(
        "Read {} ({}, {} bytes)",
        path.display(),
        source.media_type(),
        source.size()
    );
    Ok(source)
}

/// Read a file from disk and check it against the workflow's intake rules.
///
/// The size ceiling is checked against file metadata first, so an oversized
/// file is rejected without being read into memory.
pub async fn admit_path(
    workflow: Workflow,
    path: impl AsRef<Path>,
    max_file_bytes: u64,
) -> Result<SourceFile, PipelineError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| PipelineError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    if meta.len() > max_file_bytes {
        return Err(PipelineError::FileTooLarge {
            name: path.display().to_string(),
            size: meta.len(),
            limit: max_file_bytes,
        });
    }
    admit(workflow, read_source(path).await?, max_file_bytes)
}

/// [`admit_path`] over a selection of files, in order.
///
/// Files that fail intake come back as rejections next to the admitted ones.
/// An I/O failure on any path aborts the whole selection.
pub async fn admit_paths<P: AsRef<Path>>(
    workflow: Workflow,
    paths: impl IntoIterator<Item = P>,
    max_file_bytes: u64,
) -> Result<(Vec<SourceFile>, Vec<PipelineError>), PipelineError> {
    let mut admitted = Vec::new();
    let mut rejected = Vec::new();
    for path in paths {
        match admit_path(workflow, path, max_file_bytes).await {
            Ok(source) => admitted.push(source),
            Err(
                e @ (PipelineError::FileTooLarge { .. }
                | PipelineError::UnsupportedMediaType { .. }),
            ) => rejected.push(e),
            Err(e) => return Err(e),
        }
    }
    Ok((admitted, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn sniff_prefers_content_over_extension() {
        assert_eq!(sniff_media_type("photo.jpg", PNG_MAGIC), Some("image/png"));
        assert_eq!(
            sniff_media_type("scan.bin", b"%PDF-1.7\n..."),
            Some("application/pdf")
        );
        assert_eq!(
            sniff_media_type("x", b"<?xml version=\"1.0\"?>\n<svg xmlns=\"...\"/>"),
            Some("image/svg+xml")
        );
    }

    #[test]
    fn sniff_falls_back_to_extension() {
        assert_eq!(sniff_media_type("a.webp", b"????"), Some("image/webp"));
        assert_eq!(sniff_media_type("a.PDF", b"????"), Some("application/pdf"));
        assert_eq!(sniff_media_type("notes.txt", b"hello"), None);
    }

    #[test]
    fn admit_rejects_unsupported_type() {
        let src = SourceFile::new("doc.pdf", "application/pdf", b"%PDF".to_vec());
        let err = admit(Workflow::Compress, src, 1024).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMediaType { .. }));
    }

    #[test]
    fn admit_rejects_oversized_file() {
        let src = SourceFile::new("big.png", "image/png", vec![0u8; 2048]);
        let err = admit(Workflow::Compress, src, 1024).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FileTooLarge {
                size: 2048,
                limit: 1024,
                ..
            }
        ));
    }

    #[test]
    fn admit_all_preserves_order() {
        let files = vec![
            SourceFile::new("a.png", "image/png", vec![1]),
            SourceFile::new("b.txt", "text/plain", vec![2]),
            SourceFile::new("c.jpg", "image/jpeg", vec![3]),
        ];
        let (ok, rejected) = admit_all(Workflow::Resize, files, 1024);
        let names: Vec<_> = ok.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["a.png", "c.jpg"]);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn svg_text_source() {
        let s = SourceFile::svg_text("<svg/>");
        assert_eq!(s.name(), "converted.svg");
        assert_eq!(s.media_type(), "image/svg+xml");
        assert!(!s.is_paginated());
    }

    #[tokio::test]
    async fn admit_path_sniffs_and_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabelled.jpg");
        tokio::fs::write(&path, PNG_MAGIC).await.unwrap();

        let src = admit_path(Workflow::Compress, &path, 1024).await.unwrap();
        assert_eq!(src.name(), "mislabelled.jpg");
        assert_eq!(src.media_type(), "image/png");

        let err = admit_path(Workflow::Compress, &path, 4).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn read_source_missing_file() {
        let err = read_source("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, PipelineError::ReadFailed { .. }));
    }
}
