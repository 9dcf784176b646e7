//! Observer trait for run, record and staleness events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! batch as it is processed. The CLI uses this to drive its progress bar;
//! an embedding application can forward the events to whatever UI it has.
//!
//! # Example
//!
//! ```rust
//! use pixbatch::{PipelineObserver, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_item_complete(&self, index: usize, total: usize, output_bytes: u64) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} done (record {index}, {output_bytes} bytes)");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(observer as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Receives pipeline events.
///
/// Item events carry the record's index at dispatch time. They are emitted
/// from the task driving `run_all`, never while the pipeline's state lock
/// is held, so an observer may call back into read-only pipeline methods.
/// All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// Called once when a run dispatches its records.
    fn on_run_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a record's adapter call is started.
    fn on_item_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a record settles with a new artifact.
    ///
    /// # Arguments
    /// * `index`: 0-based record index at dispatch time
    /// * `total`: records in the run
    /// * `output_bytes`: size of the produced artifact
    fn on_item_complete(&self, index: usize, total: usize, output_bytes: u64) {
        let _ = (index, total, output_bytes);
    }

    /// Called when a record settles with a codec failure.
    fn on_item_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every dispatched record has settled.
    fn on_run_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }

    /// Called whenever the batch's staleness flag flips.
    fn on_staleness_changed(&self, stale: bool) {
        let _ = stale;
    }
}

/// Observer that ignores everything. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        succeeded: AtomicUsize,
        stale: AtomicBool,
    }

    impl PipelineObserver for Tracking {
        fn on_item_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _index: usize, _total: usize, _output_bytes: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, _total: usize, succeeded: usize) {
            self.succeeded.store(succeeded, Ordering::SeqCst);
        }

        fn on_staleness_changed(&self, stale: bool) {
            self.stale.store(stale, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let cb = NoopObserver;
        cb.on_run_start(3);
        cb.on_item_start(0, 3);
        cb.on_item_complete(0, 3, 42);
        cb.on_item_error(1, 3, "decode failed");
        cb.on_run_complete(3, 2);
        cb.on_staleness_changed(true);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let t = Tracking::default();
        t.on_item_start(0, 2);
        t.on_item_complete(0, 2, 100);
        t.on_item_start(1, 2);
        t.on_item_error(1, 2, "corrupt");
        t.on_run_complete(2, 1);
        t.on_staleness_changed(true);

        assert_eq!(t.starts.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 1);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.succeeded.load(Ordering::SeqCst), 1);
        assert!(t.stale.load(Ordering::SeqCst));
    }

    #[test]
    fn arc_dyn_observer_works() {
        let cb: ProgressCallback = Arc::new(NoopObserver);
        cb.on_run_start(10);
        cb.on_item_complete(1, 10, 512);
    }
}
