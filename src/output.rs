//! Output types: artifacts, downloads and run statistics.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A derived output produced from one source by a codec adapter.
///
/// Owned by its record and replaced wholesale when the record is
/// reprocessed. The payload is shared (`Arc`) so views and downloads can
/// hand it out without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl Artifact {
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

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// `data:` URI for inline previews.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, STANDARD.encode(&self.bytes))
    }

    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            name: self.name.clone(),
            media_type: self.media_type.clone(),
            size: self.size(),
        }
    }

    /// Same payload under another name.
    pub(crate) fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            media_type: self.media_type.clone(),
            bytes: Arc::clone(&self.bytes),
        }
    }

    pub(crate) fn into_download(self) -> Download {
        Download {
            name: self.name,
            media_type: self.media_type,
            bytes: self.bytes,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Serialisable description of an artifact (no payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

/// A single downloadable blob: either one artifact verbatim or an archive
/// bundling several.
#[derive(Clone)]
pub struct Download {
    pub name: String,
    pub media_type: String,
    pub bytes: Arc<[u8]>,
}

impl Download {
    pub fn is_archive(&self) -> bool {
        self.media_type == "application/zip"
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Outcome counts for one `run_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Records dispatched.
    pub total: usize,
    /// Records that settled with a new artifact.
    pub succeeded: usize,
    /// Records that settled with a codec failure.
    pub failed: usize,
    /// Results dropped because their record was removed or the batch was
    /// replaced while the call was in flight.
    pub discarded: usize,
    /// Wall-clock time from dispatch to the last settlement.
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.total > 0 && self.succeeded == self.total
    }
}

/// Aggregate sizes over records that currently hold an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchTotals {
    pub records: usize,
    pub original_bytes: u64,
    pub output_bytes: u64,
}

impl BatchTotals {
    /// Percentage saved relative to the originals; negative when outputs
    /// are larger.
    pub fn savings_percent(&self) -> f64 {
        savings_percent(self.original_bytes, self.output_bytes)
    }
}

/// `(original − output) / original × 100`, or 0 for an empty original.
pub fn savings_percent(original: u64, output: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - output as f64) / original as f64 * 100.0
}
