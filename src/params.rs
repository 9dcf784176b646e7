//! Processing parameters shared by every record in a batch.
//!
//! Each [`crate::Pipeline`] owns exactly one [`ProcessingParameters`] value.
//! Constructors validate their input so an out-of-range value can never
//! become "current": the setter returns an error and the previous value
//! stays in place.

use crate::error::PipelineError;
use crate::source::SourceFile;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard ceiling for either target dimension, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

// ── Quality ──────────────────────────────────────────────────────────────

/// Lossy encoder quality as a fraction in `[0.05, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Quality(f32);

impl Quality {
    pub const MIN: f32 = 0.05;
    pub const MAX: f32 = 1.0;

    /// Starting quality of the compress workflow.
    pub const DEFAULT: Quality = Quality(0.8);

    /// Quality used when resize or conversion writes a lossy format.
    pub const REENCODE: Quality = Quality(0.9);

    pub fn new(value: f32) -> Result<Self, PipelineError> {
        if !value.is_finite() || !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(PipelineError::invalid(
                "quality",
                format!("must be within {}–{}, got {value}", Self::MIN, Self::MAX),
            ));
        }
        Ok(Self(value))
    }

    /// Parse a whole-number percentage (5–100), the unit most users type.
    pub fn from_percent(percent: u32) -> Result<Self, PipelineError> {
        if !(5..=100).contains(&percent) {
            return Err(PipelineError::invalid(
                "quality",
                format!("percentage must be within 5–100, got {percent}"),
            ));
        }
        Self::new(percent as f32 / 100.0)
    }

    pub fn get(self) -> f32 {
        self.0
    }

    /// Quality on the 1–100 scale used by JPEG encoders.
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

impl TryFrom<f32> for Quality {
    type Error = PipelineError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quality> for f32 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

// ── Dimensions ───────────────────────────────────────────────────────────

/// Pixel dimensions. Values built with [`Dimensions::new`] have both sides
/// within `1..=MAX_DIMENSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, PipelineError> {
        let dims = Self { width, height };
        dims.validate()?;
        Ok(dims)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        check_side("width", self.width)?;
        check_side("height", self.height)
    }
}

fn check_side(name: &'static str, value: u32) -> Result<(), PipelineError> {
    if value == 0 || value > MAX_DIMENSION {
        return Err(PipelineError::invalid(
            name,
            format!("must be within 1–{MAX_DIMENSION} px, got {value}"),
        ));
    }
    Ok(())
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Width divided by height of a reference image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRatio(f64);

impl AspectRatio {
    /// `None` when either side is zero.
    pub fn from_size(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self(width as f64 / height as f64))
    }

    pub fn get(self) -> f64 {
        self.0
    }

    pub fn height_for(self, width: u32) -> u32 {
        ((width as f64 / self.0).round() as u32).max(1)
    }

    pub fn width_for(self, height: u32) -> u32 {
        ((height as f64 * self.0).round() as u32).max(1)
    }
}

/// Resize parameters.
///
/// The aspect lock is a convenience for whoever edits the dimensions: while
/// it is on and a ratio is known, changing one side recomputes the other.
/// The resize adapter itself always honours `dimensions` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResizeParams {
    pub dimensions: Dimensions,
    pub aspect_lock: bool,
    pub ratio: Option<AspectRatio>,
}

impl Default for ResizeParams {
    fn default() -> Self {
        Self {
            dimensions: Dimensions {
                width: 800,
                height: 600,
            },
            aspect_lock: true,
            ratio: None,
        }
    }
}

impl ResizeParams {
    /// Set the width, deriving the height when locked.
    pub fn with_width(self, width: u32) -> Result<Self, PipelineError> {
        let height = match (self.aspect_lock, self.ratio) {
            (true, Some(r)) => r.height_for(width),
            _ => self.dimensions.height,
        };
        Ok(Self {
            dimensions: Dimensions::new(width, height)?,
            ..self
        })
    }

    /// Adopt `ratio` as the reference ratio. When locked, the height is
    /// recomputed from the current width.
    pub fn with_ratio(self, ratio: AspectRatio) -> Result<Self, PipelineError> {
        let updated = Self {
            ratio: Some(ratio),
            ..self
        };
        if updated.aspect_lock {
            updated.with_width(updated.dimensions.width)
        } else {
            Ok(updated)
        }
    }

    /// Set the height, deriving the width when locked.
    pub fn with_height(self, height: u32) -> Result<Self, PipelineError> {
        let width = match (self.aspect_lock, self.ratio) {
            (true, Some(r)) => r.width_for(height),
            _ => self.dimensions.width,
        };
        Ok(Self {
            dimensions: Dimensions::new(width, height)?,
            ..self
        })
    }
}

// ── Output format ────────────────────────────────────────────────────────

/// Target output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    /// SVG pass-through; only valid for the SVG export workflow.
    Svg,
}

impl OutputFormat {
    /// Canonical MIME type.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Svg => "image/svg+xml",
        }
    }

    /// File extension written into output names.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Svg => "svg",
        }
    }

    /// The `image` crate format, `None` for vector output.
    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            OutputFormat::Jpeg => Some(ImageFormat::Jpeg),
            OutputFormat::Png => Some(ImageFormat::Png),
            OutputFormat::Webp => Some(ImageFormat::WebP),
            OutputFormat::Gif => Some(ImageFormat::Gif),
            OutputFormat::Svg => None,
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(OutputFormat::Jpeg),
            "image/png" => Some(OutputFormat::Png),
            "image/webp" => Some(OutputFormat::Webp),
            "image/gif" => Some(OutputFormat::Gif),
            "image/svg+xml" => Some(OutputFormat::Svg),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "gif" => Ok(OutputFormat::Gif),
            "svg" => Ok(OutputFormat::Svg),
            other => Err(PipelineError::invalid(
                "format",
                format!("unknown output format '{other}'"),
            )),
        }
    }
}

// ── Workflow ─────────────────────────────────────────────────────────────

/// The four transformation workflows. Each pipeline instance serves one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Compress,
    Resize,
    Convert,
    SvgExport,
}

const BITMAP_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const CONVERT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "application/pdf",
];
const SVG_TYPES: &[&str] = &["image/svg+xml"];

impl Workflow {
    pub fn name(self) -> &'static str {
        match self {
            Workflow::Compress => "compress",
            Workflow::Resize => "resize",
            Workflow::Convert => "convert",
            Workflow::SvgExport => "svg-export",
        }
    }

    /// Media types admitted into a batch for this workflow.
    pub fn accepted_media_types(self) -> &'static [&'static str] {
        match self {
            Workflow::Compress | Workflow::Resize => BITMAP_TYPES,
            Workflow::Convert => CONVERT_TYPES,
            Workflow::SvgExport => SVG_TYPES,
        }
    }

    pub fn accepts(self, media_type: &str) -> bool {
        let media_type = if media_type == "image/jpg" {
            "image/jpeg"
        } else {
            media_type
        };
        self.accepted_media_types().contains(&media_type)
    }

    pub fn default_parameters(self) -> ProcessingParameters {
        match self {
            Workflow::Compress => ProcessingParameters::Compress {
                quality: Quality::DEFAULT,
            },
            Workflow::Resize => ProcessingParameters::Resize(ResizeParams::default()),
            Workflow::Convert => ProcessingParameters::Convert {
                format: OutputFormat::Png,
            },
            Workflow::SvgExport => ProcessingParameters::SvgExport {
                format: OutputFormat::Png,
            },
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── ProcessingParameters ─────────────────────────────────────────────────

/// The single parameter value applied to every record of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", rename_all = "snake_case")]
pub enum ProcessingParameters {
    Compress { quality: Quality },
    Resize(ResizeParams),
    Convert { format: OutputFormat },
    SvgExport { format: OutputFormat },
}

impl ProcessingParameters {
    pub fn workflow(&self) -> Workflow {
        match self {
            ProcessingParameters::Compress { .. } => Workflow::Compress,
            ProcessingParameters::Resize(_) => Workflow::Resize,
            ProcessingParameters::Convert { .. } => Workflow::Convert,
            ProcessingParameters::SvgExport { .. } => Workflow::SvgExport,
        }
    }

    /// Re-check every field. Deserialised values go through here before use.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            ProcessingParameters::Compress { quality } => Quality::new(quality.get()).map(|_| ()),
            ProcessingParameters::Resize(r) => r.dimensions.validate(),
            ProcessingParameters::Convert { format } => match format {
                OutputFormat::Svg => Err(PipelineError::invalid(
                    "format",
                    "bitmap conversion cannot produce SVG",
                )),
                _ => Ok(()),
            },
            ProcessingParameters::SvgExport { format } => match format {
                OutputFormat::Png | OutputFormat::Jpeg | OutputFormat::Svg => Ok(()),
                other => Err(PipelineError::invalid(
                    "format",
                    format!("SVG export supports png, jpeg or svg, got {other}"),
                )),
            },
        }
    }

    /// Whether both values would produce the same artifacts.
    ///
    /// Only fields the adapters read take part: toggling the resize aspect
    /// lock alone does not make existing artifacts outdated.
    pub fn same_output(&self, other: &Self) -> bool {
        match (self, other) {
            (ProcessingParameters::Resize(a), ProcessingParameters::Resize(b)) => {
                a.dimensions == b.dimensions
            }
            _ => self == other,
        }
    }
}

// ── Per-item parameter ───────────────────────────────────────────────────

/// Per-record override independent of the shared parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemParameter {
    /// 1-based page for paginated sources, `None` otherwise.
    pub page: Option<u32>,
}

impl ItemParameter {
    /// Defaults for a freshly loaded source: page 1 for PDFs.
    pub fn for_source(source: &SourceFile) -> Self {
        Self {
            page: source.is_paginated().then_some(1),
        }
    }
}
