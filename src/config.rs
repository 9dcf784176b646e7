//! Configuration for a [`crate::Pipeline`].
//!
//! All behaviour that is not a per-batch parameter lives in
//! [`PipelineConfig`], built via its [`PipelineConfigBuilder`]. Defaults are
//! compile-time constants; there is no environment configuration beyond what
//! the CLI maps onto the builder.

use crate::error::PipelineError;
use crate::params::Quality;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Default per-file size ceiling: 25 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 25 * 1024 * 1024;

/// Default longest edge after compression.
pub const DEFAULT_COMPRESS_MAX_EDGE: u32 = 4096;

/// Default number of adapter calls in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Configuration for a pipeline instance.
///
/// # Example
/// ```rust
/// use pixbatch::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .max_file_bytes(10 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Adapter calls in flight at once during a run. Default: 8.
    ///
    /// All records of a run are dispatched in record order; this only bounds
    /// how many are logically in flight. CPU-bound codec work runs on the
    /// blocking thread pool, so the value also caps decode memory.
    pub concurrency: usize,

    /// Files larger than this are rejected at intake. Default: 25 MiB.
    pub max_file_bytes: u64,

    /// Longest edge of a compressed image; larger inputs are scaled down
    /// proportionally before re-encoding. Default: 4096.
    pub compress_max_edge: u32,

    /// Quality used when resize or conversion writes a lossy format.
    /// Default: 0.9.
    pub reencode_quality: Quality,

    /// Scale applied to a PDF page's natural size when rasterising.
    /// Range: 0.25–8.0. Default: 2.0.
    pub pdf_render_scale: f32,

    /// Raster size used for SVG documents that declare no usable size.
    /// Default: 400.
    pub svg_fallback_size: u32,

    /// Keep the previous artifact (as outdated) when a rerun fails.
    /// Default: false, so a failed record holds no artifact.
    pub retain_stale_on_failure: bool,

    /// Directory or file of the pdfium shared library. When `None` the
    /// system library search path is used.
    pub pdfium_library: Option<PathBuf>,

    /// Receives run, record and staleness events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            compress_max_edge: DEFAULT_COMPRESS_MAX_EDGE,
            reencode_quality: Quality::REENCODE,
            pdf_render_scale: 2.0,
            svg_fallback_size: 400,
            retain_stale_on_failure: false,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("compress_max_edge", &self.compress_max_edge)
            .field("reencode_quality", &self.reencode_quality)
            .field("pdf_render_scale", &self.pdf_render_scale)
            .field("svg_fallback_size", &self.svg_fallback_size)
            .field("retain_stale_on_failure", &self.retain_stale_on_failure)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineObserver>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn compress_max_edge(mut self, px: u32) -> Self {
        self.config.compress_max_edge = px;
        self
    }

    pub fn reencode_quality(mut self, quality: Quality) -> Self {
        self.config.reencode_quality = quality;
        self
    }

    pub fn pdf_render_scale(mut self, scale: f32) -> Self {
        self.config.pdf_render_scale = scale;
        self
    }

    pub fn svg_fallback_size(mut self, px: u32) -> Self {
        self.config.svg_fallback_size = px;
        self
    }

    pub fn retain_stale_on_failure(mut self, v: bool) -> Self {
        self.config.retain_stale_on_failure = v;
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_file_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        if c.compress_max_edge == 0 || c.compress_max_edge > crate::params::MAX_DIMENSION {
            return Err(PipelineError::InvalidConfig(format!(
                "Compression max edge must be 1–{}, got {}",
                crate::params::MAX_DIMENSION,
                c.compress_max_edge
            )));
        }
        if !(0.25..=8.0).contains(&c.pdf_render_scale) {
            return Err(PipelineError::InvalidConfig(format!(
                "PDF render scale must be 0.25–8.0, got {}",
                c.pdf_render_scale
            )));
        }
        if c.svg_fallback_size == 0 || c.svg_fallback_size > crate::params::MAX_DIMENSION {
            return Err(PipelineError::InvalidConfig(format!(
                "SVG fallback size must be 1–{}, got {}",
                crate::params::MAX_DIMENSION,
                c.svg_fallback_size
            )));
        }
        Ok(self.config)
    }
}
