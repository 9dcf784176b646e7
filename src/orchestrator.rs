//! The pipeline orchestrator.
//!
//! A [`Pipeline`] serves one workflow. It owns the batch (a
//! [`RecordStore`]), the shared [`ProcessingParameters`], the staleness flag
//! and the run guard, and it decides when the codec adapter is called.
//!
//! ## Run lifecycle
//!
//! ```text
//! run_all
//!  │
//!  ├─ 1. Guard     refuse if this batch already has a run in flight
//!  ├─ 2. Begin     every record → Processing; snapshot parameters
//!  ├─ 3. Fan out   one adapter call per record, dispatched in record order
//!  ├─ 4. Settle    apply each outcome by RecordId as it arrives
//!  └─ 5. Finish    re-derive staleness, release the guard
//! ```
//!
//! All state sits behind one mutex that is never held across an `.await`,
//! so parameter edits, removals and batch replacement may happen while a
//! run is in flight. In-flight calls keep the parameter snapshot they were
//! dispatched with. A result whose record has since been removed, or whose
//! batch was replaced, is discarded instead of being written to whichever
//! record now occupies that index.

use crate::archive;
use crate::codec::{self, CodecAdapter, CodecJob};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::naming;
use crate::output::{BatchTotals, Download, RunSummary};
use crate::params::{
    AspectRatio, Dimensions, ItemParameter, OutputFormat, ProcessingParameters, Quality,
    ResizeParams, Workflow,
};
use crate::progress::{NoopObserver, PipelineObserver};
use crate::record::{ProcessingRecord, RecordStore, RecordView};
use crate::source::{self, SourceFile};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Identifies one `run_all` call and the batch it was started against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveRun {
    epoch: u64,
    id: u64,
}

#[derive(Debug)]
struct PipelineState {
    store: RecordStore,
    params: ProcessingParameters,
    stale: bool,
    active_run: Option<ActiveRun>,
    runs_started: u64,
}

impl PipelineState {
    /// Set the flag, returning the new value if it changed.
    fn set_stale(&mut self, stale: bool) -> Option<bool> {
        (self.stale != stale).then(|| {
            self.stale = stale;
            stale
        })
    }
}

/// Batch processor for one workflow.
pub struct Pipeline {
    workflow: Workflow,
    config: PipelineConfig,
    adapter: Arc<dyn CodecAdapter>,
    state: Mutex<PipelineState>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("workflow", &self.workflow)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A pipeline using the production adapter for `workflow`.
    pub fn new(workflow: Workflow, config: PipelineConfig) -> Self {
        let adapter = codec::adapter_for(workflow, &config);
        Self::with_adapter(workflow, config, adapter)
    }

    /// A pipeline using a caller-supplied adapter.
    pub fn with_adapter(
        workflow: Workflow,
        config: PipelineConfig,
        adapter: Arc<dyn CodecAdapter>,
    ) -> Self {
        Self {
            workflow,
            config,
            adapter,
            state: Mutex::new(PipelineState {
                store: RecordStore::new(),
                params: workflow.default_parameters(),
                stale: false,
                active_run: None,
                runs_started: 0,
            }),
        }
    }

    pub fn workflow(&self) -> Workflow {
        self.workflow
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Batch ────────────────────────────────────────────────────────────

    /// Replace the batch with the admissible `sources`.
    ///
    /// Files failing intake (wrong type, too large) are returned and never
    /// become records. Clears the staleness flag. For the resize workflow
    /// the aspect ratio is taken from the first source and, when the lock
    /// is on, the target height is recomputed from the current width.
    pub fn load(&self, sources: impl IntoIterator<Item = SourceFile>) -> Vec<PipelineError> {
        let (admitted, rejected) =
            source::admit_all(self.workflow, sources, self.config.max_file_bytes);
        for err in &rejected {
            warn!("Rejected file: {}", err);
        }
        self.replace(admitted);
        rejected
    }

    /// Append `sources` to the batch.
    ///
    /// The batch is rebuilt wholesale from the existing sources plus the new
    /// ones, so every record returns to idle.
    pub fn add(&self, sources: impl IntoIterator<Item = SourceFile>) -> Vec<PipelineError> {
        let (admitted, rejected) =
            source::admit_all(self.workflow, sources, self.config.max_file_bytes);
        for err in &rejected {
            warn!("Rejected file: {}", err);
        }
        let mut all = self.lock().store.sources();
        all.extend(admitted);
        self.replace(all);
        rejected
    }

    /// Delete the record at `index`. Returns `false` when out of bounds.
    pub fn remove(&self, index: usize) -> bool {
        let (removed, change) = {
            let mut s = self.lock();
            let removed = s.store.remove_at(index);
            let change = match removed {
                Some(_) if !s.store.any_succeeded() => s.set_stale(false),
                _ => None,
            };
            (removed, change)
        };
        if let Some(record) = &removed {
            debug!("Removed {} ({})", record.id(), record.source().name());
        }
        self.notify_staleness(change);
        removed.is_some()
    }

    /// Empty the batch.
    pub fn clear(&self) {
        let change = {
            let mut s = self.lock();
            s.store.clear();
            s.set_stale(false)
        };
        debug!("Cleared {} batch", self.workflow);
        self.notify_staleness(change);
    }

    fn replace(&self, sources: Vec<SourceFile>) {
        let count = sources.len();
        let change = {
            let mut s = self.lock();
            s.store.initialize(sources);
            let ratio = match self.workflow {
                Workflow::Resize => s
                    .store
                    .get(0)
                    .and_then(ProcessingRecord::source_dimensions)
                    .and_then(|d| AspectRatio::from_size(d.width, d.height)),
                _ => None,
            };
            if let (ProcessingParameters::Resize(r), Some(ratio)) = (s.params, ratio) {
                match r.with_ratio(ratio) {
                    Ok(derived) => s.params = ProcessingParameters::Resize(derived),
                    Err(e) => warn!("Keeping {} for the new batch: {}", r.dimensions, e),
                }
            }
            s.set_stale(false)
        };
        info!("Loaded {} file(s) into {} batch", count, self.workflow);
        self.notify_staleness(change);
    }

    // ── Parameters ───────────────────────────────────────────────────────

    /// Replace the shared parameters.
    ///
    /// Invalid values are rejected and the previous value stays current.
    /// When the new value changes the output and some record holds an
    /// artifact, the batch becomes stale. Nothing is recomputed.
    pub fn set_parameters(&self, params: ProcessingParameters) -> Result<(), PipelineError> {
        if params.workflow() != self.workflow {
            return Err(PipelineError::ParameterNotApplicable {
                name: "parameters",
                workflow: self.workflow.name(),
            });
        }
        params.validate()?;

        let change = {
            let mut s = self.lock();
            let changes_output = !s.params.same_output(&params);
            s.params = params;
            if changes_output && s.store.any_succeeded() {
                s.set_stale(true)
            } else {
                None
            }
        };
        debug!("Parameters now {:?}", params);
        self.notify_staleness(change);
        Ok(())
    }

    pub fn set_quality(&self, quality: Quality) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Compress { .. } => {
                self.set_parameters(ProcessingParameters::Compress { quality })
            }
            _ => Err(self.not_applicable("quality")),
        }
    }

    pub fn set_dimensions(&self, dimensions: Dimensions) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Resize(r) => {
                dimensions.validate()?;
                self.set_parameters(ProcessingParameters::Resize(ResizeParams {
                    dimensions,
                    ..r
                }))
            }
            _ => Err(self.not_applicable("dimensions")),
        }
    }

    /// Set the target width; the height follows when the aspect lock is on.
    pub fn set_width(&self, width: u32) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Resize(r) => {
                self.set_parameters(ProcessingParameters::Resize(r.with_width(width)?))
            }
            _ => Err(self.not_applicable("width")),
        }
    }

    /// Set the target height; the width follows when the aspect lock is on.
    pub fn set_height(&self, height: u32) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Resize(r) => {
                self.set_parameters(ProcessingParameters::Resize(r.with_height(height)?))
            }
            _ => Err(self.not_applicable("height")),
        }
    }

    pub fn set_aspect_lock(&self, locked: bool) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Resize(r) => {
                self.set_parameters(ProcessingParameters::Resize(ResizeParams {
                    aspect_lock: locked,
                    ..r
                }))
            }
            _ => Err(self.not_applicable("aspect_lock")),
        }
    }

    pub fn set_format(&self, format: OutputFormat) -> Result<(), PipelineError> {
        match self.parameters() {
            ProcessingParameters::Convert { .. } => {
                self.set_parameters(ProcessingParameters::Convert { format })
            }
            ProcessingParameters::SvgExport { .. } => {
                self.set_parameters(ProcessingParameters::SvgExport { format })
            }
            _ => Err(self.not_applicable("format")),
        }
    }

    /// Select the (1-based) page rendered for the paginated source at
    /// `index`. Status and artifact of the record are left untouched.
    pub fn set_page(&self, index: usize, page: u32) -> Result<(), PipelineError> {
        self.lock()
            .store
            .update_item_parameter(index, ItemParameter { page: Some(page) })
    }

    fn not_applicable(&self, name: &'static str) -> PipelineError {
        PipelineError::ParameterNotApplicable {
            name,
            workflow: self.workflow.name(),
        }
    }

    // ── Run ──────────────────────────────────────────────────────────────

    /// Process every record of the batch with the current parameters.
    ///
    /// Adapter calls run concurrently (up to `config.concurrency` in
    /// flight) and settle in any order; each outcome is written back to the
    /// record it was dispatched for. One record failing never affects the
    /// others. Returns when every call has settled.
    ///
    /// An empty batch yields an empty summary. A second call while this
    /// batch still has unsettled calls fails with
    /// [`PipelineError::RunInProgress`].
    pub async fn run_all(&self) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();

        let (run, dispatches, params) = {
            let mut s = self.lock();
            if s.store.is_empty() {
                return Ok(RunSummary::default());
            }
            let epoch = s.store.epoch();
            if s.active_run.is_some_and(|r| r.epoch == epoch) {
                return Err(PipelineError::RunInProgress);
            }
            s.runs_started += 1;
            let run = ActiveRun {
                epoch,
                id: s.runs_started,
            };
            s.active_run = Some(run);
            (run, s.store.begin_processing(), s.params)
        };
        let _guard = RunGuard {
            state: &self.state,
            run,
        };

        let total = dispatches.len();
        let retain = self.config.retain_stale_on_failure;
        let observer = self.observer();
        info!(
            "Starting {} run #{}: {} record(s), {} in flight",
            self.workflow, run.id, total, self.config.concurrency
        );
        observer.on_run_start(total);

        let settled = stream::iter(dispatches.into_iter().map(|dispatch| {
            let adapter = Arc::clone(&self.adapter);
            let observer = Arc::clone(&observer);
            async move {
                observer.on_item_start(dispatch.index, total);
                let job = CodecJob {
                    source: Arc::clone(&dispatch.source),
                    params,
                    item: dispatch.item,
                };
                let outcome = adapter.process(job).await;
                (dispatch, outcome)
            }
        }))
        .buffer_unordered(self.config.concurrency);
        futures::pin_mut!(settled);

        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        while let Some((dispatch, outcome)) = settled.next().await {
            let result = outcome.as_ref().map(|a| a.size()).map_err(|e| e.to_string());
            let applied = self.lock().store.settle(dispatch.id, outcome, params, retain);

            if !applied {
                summary.discarded += 1;
                warn!(
                    "Discarding late result for {} ({}): record no longer in batch",
                    dispatch.id,
                    dispatch.source.name()
                );
                continue;
            }
            match result {
                Ok(size) => {
                    summary.succeeded += 1;
                    debug!("{} → {} bytes", dispatch.source.name(), size);
                    observer.on_item_complete(dispatch.index, total, size);
                }
                Err(reason) => {
                    summary.failed += 1;
                    warn!("{} failed: {}", dispatch.source.name(), reason);
                    observer.on_item_error(dispatch.index, total, &reason);
                }
            }
        }

        let change = {
            let mut s = self.lock();
            if s.store.epoch() == run.epoch {
                let stale = !s.params.same_output(&params) && s.store.any_succeeded();
                s.set_stale(stale)
            } else {
                None
            }
        };
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "{} run #{} complete: {}/{} succeeded, {} failed, {} discarded, {}ms",
            self.workflow,
            run.id,
            summary.succeeded,
            summary.total,
            summary.failed,
            summary.discarded,
            summary.duration_ms
        );
        observer.on_run_complete(total, summary.succeeded);
        self.notify_staleness(change);
        Ok(summary)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// True when the parameters changed since the artifacts were produced.
    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    pub fn parameters(&self) -> ProcessingParameters {
        self.lock().params
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    /// Serialisable snapshot of every record, in batch order.
    pub fn records(&self) -> Vec<RecordView> {
        self.lock()
            .store
            .iter()
            .enumerate()
            .map(|(i, r)| r.view(i))
            .collect()
    }

    /// A copy of the record at `index`.
    pub fn record(&self, index: usize) -> Option<ProcessingRecord> {
        self.lock().store.get(index).cloned()
    }

    pub fn totals(&self) -> BatchTotals {
        self.lock().store.totals()
    }

    // ── Downloads ────────────────────────────────────────────────────────

    /// The artifact of the record at `index`, if it has one.
    pub fn download(&self, index: usize) -> Result<Option<Download>, PipelineError> {
        let s = self.lock();
        let record = s.store.get(index).ok_or(PipelineError::IndexOutOfBounds {
            index,
            len: s.store.len(),
        })?;
        Ok(record.artifact().cloned().map(|a| a.into_download()))
    }

    /// Every available artifact as one download: the artifact itself when
    /// there is exactly one, a ZIP archive when there are several, `None`
    /// when there are none. Duplicate names inside the archive are made
    /// unique.
    pub async fn download_all(&self) -> Result<Option<Download>, PipelineError> {
        let artifacts: Vec<_> = self
            .lock()
            .store
            .iter()
            .filter_map(|r| r.artifact().cloned())
            .collect();
        if artifacts.is_empty() {
            return Ok(None);
        }

        let names = naming::dedupe(artifacts.iter().map(|a| a.name()));
        let artifacts = artifacts
            .iter()
            .zip(names)
            .map(|(a, name)| a.renamed(name))
            .collect();
        let download =
            archive::package_async(artifacts, naming::archive_name(self.workflow).to_string())
                .await?;
        Ok(Some(download))
    }

    /// Write `download` to `destination` atomically (temp file + rename).
    ///
    /// When `destination` is an existing directory the download's own name
    /// is used inside it. Returns the path written.
    pub async fn save_download(
        download: &Download,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf, PipelineError> {
        let destination = destination.as_ref();
        let path = if tokio::fs::metadata(destination)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            destination.join(&download.name)
        } else {
            destination.to_path_buf()
        };
        let write_err = |e| PipelineError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp_path, &download.bytes)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(write_err)?;

        debug!("Wrote {} ({} bytes)", path.display(), download.bytes.len());
        Ok(path)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        lock_state(&self.state)
    }

    fn observer(&self) -> Arc<dyn PipelineObserver> {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver))
    }

    fn notify_staleness(&self, change: Option<bool>) {
        if let Some(stale) = change {
            debug!("Batch is now {}", if stale { "stale" } else { "current" });
            if let Some(cb) = &self.config.progress_callback {
                cb.on_staleness_changed(stale);
            }
        }
    }
}

/// A panic while holding the lock leaves the state consistent (every
/// mutation is a single assignment), so poisoning is recovered.
fn lock_state(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the run guard when `run_all` finishes or is dropped mid-run.
struct RunGuard<'a> {
    state: &'a Mutex<PipelineState>,
    run: ActiveRun,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut s = lock_state(self.state);
        if s.active_run == Some(self.run) {
            s.active_run = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Outcome;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Duration;

    /// Adapter whose calls never settle.
    struct Hanging;

    impl CodecAdapter for Hanging {
        fn process(&self, _job: CodecJob) -> BoxFuture<'static, Outcome> {
            futures::future::pending().boxed()
        }
    }

    fn hanging_pipeline() -> Pipeline {
        let p = Pipeline::with_adapter(
            Workflow::Compress,
            PipelineConfig::default(),
            Arc::new(Hanging),
        );
        p.load([SourceFile::new("a.png", "image/png", vec![0u8; 8])]);
        p
    }

    #[test]
    fn set_stale_reports_only_changes() {
        let mut s = PipelineState {
            store: RecordStore::new(),
            params: Workflow::Compress.default_parameters(),
            stale: false,
            active_run: None,
            runs_started: 0,
        };
        assert_eq!(s.set_stale(false), None);
        assert_eq!(s.set_stale(true), Some(true));
        assert_eq!(s.set_stale(true), None);
        assert_eq!(s.set_stale(false), Some(false));
    }

    #[tokio::test]
    async fn cancelled_run_releases_guard() {
        let p = hanging_pipeline();
        let res = tokio::time::timeout(Duration::from_millis(20), p.run_all()).await;
        assert!(res.is_err(), "run should still be pending");
        assert!(p.lock().active_run.is_none());
        assert_eq!(p.lock().runs_started, 1);
    }

    #[tokio::test]
    async fn replacing_batch_allows_a_new_run() {
        let p = hanging_pipeline();
        let first = p.run_all();
        futures::pin_mut!(first);
        assert!(futures::poll!(first.as_mut()).is_pending());

        assert!(matches!(
            p.run_all().now_or_never(),
            Some(Err(PipelineError::RunInProgress))
        ));

        // A new batch has a new epoch, so the old run no longer blocks it.
        p.load([SourceFile::new("b.png", "image/png", vec![0u8; 8])]);
        assert!(futures::poll!(Box::pin(p.run_all())).is_pending());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let p = hanging_pipeline();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = p.lock();
            panic!("poison");
        }));
        assert_eq!(p.len(), 1);
    }
}
