//! CLI binary for pixbatch.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `PipelineConfig` plus batch parameters, runs the batch once and writes
//! the download.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pixbatch::{
    source, Dimensions, OutputFormat, Pipeline, PipelineConfig, PipelineError, PipelineObserver,
    ProgressCallback, Quality, RecordView, RunSummary, SourceFile, Workflow,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Terminal observer: a progress bar plus one log line per settled file.
/// Files settle in any order, so start times are kept per record index.
struct CliProgress {
    bar: ProgressBar,
    names: Mutex<Vec<String>>,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Processing");

        Arc::new(Self {
            bar,
            names: Mutex::new(Vec::new()),
            start_times: Mutex::new(HashMap::new()),
        })
    }

    /// Record names by batch index, for the per-file log lines.
    fn set_names(&self, records: &[RecordView]) {
        let mut names = self.names.lock().unwrap();
        *names = records.iter().map(|r| r.name.clone()).collect();
    }

    fn name(&self, index: usize) -> String {
        self.names
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{index}"))
    }

    fn elapsed(&self, index: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl PipelineObserver for CliProgress {
    fn on_run_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} file(s)…"))
        ));
    }

    fn on_item_start(&self, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(self.name(index));
    }

    fn on_item_complete(&self, index: usize, _total: usize, output_bytes: u64) {
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            green("✓"),
            self.name(index),
            dim(&format!("{output_bytes:>9} bytes")),
            self.elapsed(index),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, _total: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            self.name(index),
            red(&msg),
            self.elapsed(index),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total: usize, succeeded: usize) {
        let failed = total.saturating_sub(succeeded);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} file(s) processed successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) processed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compress photos at 60% quality into ./out/compressed_images.zip
  pixbatch compress --quality 60 -o out/ *.jpg

  # Resize to 1024 px wide, height follows the first image's aspect ratio
  pixbatch resize --width 1024 photo.png

  # Exact size, ignoring the aspect ratio
  pixbatch resize --width 300 --height 300 --no-aspect-lock a.jpg b.jpg

  # Convert page 3 of a PDF and a GIF to WebP
  pixbatch convert --format webp --page 3 report.pdf anim.gif

  # Export an SVG as JPEG, or from inline text
  pixbatch svg --format jpeg logo.svg
  pixbatch svg --text '<svg width="10" height="10"/>' -o out.png

  # Machine-readable report
  pixbatch --json compress photo.jpg

ENVIRONMENT VARIABLES:
  PIXBATCH_OUTPUT         Default output file or directory
  PIXBATCH_CONCURRENCY    Files processed at once
  PIXBATCH_MAX_FILE_MB    Per-file size limit in MiB
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory) for PDF input
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Batch image compression, resizing, conversion and SVG export.
#[derive(Parser, Debug)]
#[command(
    name = "pixbatch",
    version,
    about = "Batch image compression, resizing, conversion and SVG export",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output file, or directory to write the download into.
    #[arg(short, long, global = true, env = "PIXBATCH_OUTPUT")]
    output: Option<PathBuf>,

    /// Files processed at once.
    #[arg(short, long, global = true, env = "PIXBATCH_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Per-file size limit in MiB.
    #[arg(long, global = true, env = "PIXBATCH_MAX_FILE_MB", default_value_t = 25)]
    max_file_mb: u64,

    /// Path to the pdfium shared library (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print every artifact as a data: URI on stdout instead of writing files.
    #[arg(long, global = true)]
    data_uri: bool,

    /// Print a JSON report (summary + records) on stdout.
    #[arg(long, global = true, env = "PIXBATCH_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "PIXBATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PIXBATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PIXBATCH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-encode JPEG/PNG/WebP files at a lower quality.
    Compress {
        /// Quality in percent (5–100).
        #[arg(long, default_value_t = 80,
              value_parser = clap::value_parser!(u32).range(5..=100))]
        quality: u32,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Scale JPEG/PNG/WebP files to a target size.
    Resize {
        /// Target width in pixels.
        #[arg(long)]
        width: Option<u32>,

        /// Target height in pixels.
        #[arg(long)]
        height: Option<u32>,

        /// Do not derive one side from the other.
        #[arg(long)]
        no_aspect_lock: bool,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Convert images or PDF pages to another format.
    Convert {
        /// Target format.
        #[arg(long, value_enum, default_value = "png")]
        format: RasterArg,

        /// 1-based page rendered from PDF inputs.
        #[arg(long, default_value_t = 1,
              value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render SVG documents to PNG/JPEG (or validate and copy as SVG).
    Svg {
        /// Target format.
        #[arg(long, value_enum, default_value = "png")]
        format: SvgArg,

        /// SVG source text, exported as `converted.<ext>`.
        #[arg(long, conflicts_with = "files")]
        text: Option<String>,

        files: Vec<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RasterArg {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl From<RasterArg> for OutputFormat {
    fn from(v: RasterArg) -> Self {
        match v {
            RasterArg::Jpeg => OutputFormat::Jpeg,
            RasterArg::Png => OutputFormat::Png,
            RasterArg::Webp => OutputFormat::Webp,
            RasterArg::Gif => OutputFormat::Gif,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SvgArg {
    Png,
    Jpeg,
    Svg,
}

impl From<SvgArg> for OutputFormat {
    fn from(v: SvgArg) -> Self {
        match v {
            SvgArg::Png => OutputFormat::Png,
            SvgArg::Jpeg => OutputFormat::Jpeg,
            SvgArg::Svg => OutputFormat::Svg,
        }
    }
}

impl Command {
    fn workflow(&self) -> Workflow {
        match self {
            Command::Compress { .. } => Workflow::Compress,
            Command::Resize { .. } => Workflow::Resize,
            Command::Convert { .. } => Workflow::Convert,
            Command::Svg { .. } => Workflow::SvgExport,
        }
    }

    fn files(&self) -> &[PathBuf] {
        match self {
            Command::Compress { files, .. }
            | Command::Resize { files, .. }
            | Command::Convert { files, .. }
            | Command::Svg { files, .. } => files,
        }
    }
}

#[derive(Serialize)]
struct Report {
    workflow: Workflow,
    summary: RunSummary,
    records: Vec<RecordView>,
    rejected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    written: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgress::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;
    let workflow = cli.command.workflow();
    let pipeline = Pipeline::new(workflow, config);

    // ── Load files ───────────────────────────────────────────────────────
    let (sources, mut rejected) =
        read_sources(&cli.command, workflow, pipeline.config().max_file_bytes).await?;
    rejected.extend(pipeline.load(sources));
    let rejected: Vec<String> = rejected.iter().map(|e| e.to_string()).collect();
    if !cli.quiet && !cli.json {
        for reason in &rejected {
            eprintln!("{} {}", red("✗"), reason);
        }
    }
    if pipeline.is_empty() {
        bail!("No acceptable input files for {workflow}");
    }
    if let Some(p) = &progress {
        p.set_names(&pipeline.records());
    }

    apply_parameters(&pipeline, &cli.command)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = pipeline.run_all().await.context("Batch run failed")?;

    // ── Output ───────────────────────────────────────────────────────────
    let mut written = None;
    if cli.data_uri {
        for index in 0..pipeline.len() {
            if let Some(record) = pipeline.record(index) {
                if let Some(artifact) = record.artifact() {
                    println!("{}\t{}", artifact.name(), artifact.data_uri());
                }
            }
        }
    } else if let Some(download) = pipeline
        .download_all()
        .await
        .context("Failed to package results")?
    {
        let destination = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = Pipeline::save_download(&download, &destination)
            .await
            .with_context(|| format!("Failed to write {}", destination.display()))?;
        if !cli.quiet && !cli.json {
            let totals = pipeline.totals();
            eprintln!(
                "{} Wrote {}  {}",
                green("✔"),
                bold(&path.display().to_string()),
                dim(&format!(
                    "{} → {} bytes ({:.1}% saved)",
                    totals.original_bytes,
                    totals.output_bytes,
                    totals.savings_percent()
                )),
            );
        }
        written = Some(path);
    }

    if cli.json {
        let report = Report {
            workflow,
            summary: summary.clone(),
            records: pipeline.records(),
            rejected,
            written,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    }

    if summary.succeeded == 0 {
        bail!("All {} file(s) failed", summary.total);
    }
    Ok(())
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency)
        .max_file_bytes(cli.max_file_mb.saturating_mul(1024 * 1024));
    if let Some(lib) = &cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Oversized and unsupported files come back as rejections; they are never
/// read into memory.
async fn read_sources(
    command: &Command,
    workflow: Workflow,
    max_file_bytes: u64,
) -> Result<(Vec<SourceFile>, Vec<PipelineError>)> {
    if let Command::Svg {
        text: Some(text), ..
    } = command
    {
        return Ok((vec![SourceFile::svg_text(text.clone())], Vec::new()));
    }
    source::admit_paths(workflow, command.files(), max_file_bytes)
        .await
        .context("Failed to read input files")
}

fn apply_parameters(pipeline: &Pipeline, command: &Command) -> Result<()> {
    match command {
        Command::Compress { quality, .. } => {
            pipeline.set_quality(Quality::from_percent(*quality)?)?;
        }
        Command::Resize {
            width,
            height,
            no_aspect_lock,
            ..
        } => {
            pipeline.set_aspect_lock(!no_aspect_lock)?;
            match (width, height) {
                (Some(w), Some(h)) => pipeline.set_dimensions(Dimensions::new(*w, *h)?)?,
                (Some(w), None) => pipeline.set_width(*w)?,
                (None, Some(h)) => pipeline.set_height(*h)?,
                (None, None) => {}
            }
        }
        Command::Convert { format, page, .. } => {
            pipeline.set_format((*format).into())?;
            for record in pipeline.records() {
                if record.page.is_some() {
                    pipeline
                        .set_page(record.index, *page)
                        .with_context(|| format!("Cannot select page for {}", record.name))?;
                }
            }
        }
        Command::Svg { format, .. } => {
            pipeline.set_format((*format).into())?;
        }
    }
    Ok(())
}
