//! The per-file record store.
//!
//! A batch is an ordered `Vec` of [`ProcessingRecord`]s. Every record has a
//! [`RecordId`] that is never reused, so a result settling after its record
//! was removed (or after the whole batch was replaced) can be recognised and
//! dropped instead of landing on whichever record now sits at that index.
//!
//! Record state is an enum rather than a bag of optional fields, which makes
//! the invariants structural:
//!
//! * an artifact is current only in [`RecordState::Succeeded`];
//! * an error detail exists only in [`RecordState::Failed`];
//! * the parameter snapshot travels with the artifact it produced
//!   ([`Derivation`]).
//!
//! While a record is reprocessed its previous derivation is kept as
//! `retained` so it stays visible (marked outdated) until the replacement
//! lands.
//!
//! Only the orchestrator transitions status; the store itself is not
//! synchronised and must be mutated through a single owner.

use crate::codec::encode;
use crate::error::{CodecError, PipelineError};
use crate::output::{savings_percent, Artifact, ArtifactInfo, BatchTotals};
use crate::params::{Dimensions, ItemParameter, ProcessingParameters};
use crate::source::SourceFile;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Stable identity of a record, unique for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId(u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse status, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Processing,
    Succeeded,
    Failed,
}

/// An artifact together with the parameters that produced it.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub artifact: Artifact,
    pub params: ProcessingParameters,
}

#[derive(Debug, Clone)]
pub enum RecordState {
    Idle,
    Processing {
        retained: Option<Derivation>,
    },
    Succeeded(Derivation),
    Failed {
        reason: CodecError,
        retained: Option<Derivation>,
    },
}

impl RecordState {
    pub fn status(&self) -> Status {
        match self {
            RecordState::Idle => Status::Idle,
            RecordState::Processing { .. } => Status::Processing,
            RecordState::Succeeded(_) => Status::Succeeded,
            RecordState::Failed { .. } => Status::Failed,
        }
    }

    /// The most recent derivation, current or retained.
    fn into_derivation(self) -> Option<Derivation> {
        match self {
            RecordState::Idle => None,
            RecordState::Succeeded(d) => Some(d),
            RecordState::Processing { retained } | RecordState::Failed { retained, .. } => retained,
        }
    }
}

/// Result a codec adapter call settles with.
pub type Outcome = Result<Artifact, CodecError>;

/// One source file and everything derived from it.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    id: RecordId,
    source: Arc<SourceFile>,
    /// Pixel size of bitmap sources, read from the header at load time.
    dimensions: Option<Dimensions>,
    item: ItemParameter,
    state: RecordState,
}

impl ProcessingRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// Pixel size of the source; `None` for documents and SVG.
    pub fn source_dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub fn item_parameter(&self) -> ItemParameter {
        self.item
    }

    pub fn state(&self) -> &RecordState {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// The current artifact; `Some` iff the record succeeded.
    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.state {
            RecordState::Succeeded(d) => Some(&d.artifact),
            _ => None,
        }
    }

    /// Failure reason; `Some` iff the record failed.
    pub fn error_detail(&self) -> Option<&CodecError> {
        match &self.state {
            RecordState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Parameters that produced the current artifact.
    pub fn params_snapshot(&self) -> Option<&ProcessingParameters> {
        match &self.state {
            RecordState::Succeeded(d) => Some(&d.params),
            _ => None,
        }
    }

    /// An earlier artifact kept visible while reprocessing (or after a
    /// failed rerun, when configured). Always outdated.
    pub fn retained_artifact(&self) -> Option<&Artifact> {
        match &self.state {
            RecordState::Processing {
                retained: Some(d), ..
            }
            | RecordState::Failed {
                retained: Some(d), ..
            } => Some(&d.artifact),
            _ => None,
        }
    }

    /// True when the current artifact was produced with parameters whose
    /// output differs from `current`.
    pub fn is_outdated(&self, current: &ProcessingParameters) -> bool {
        self.params_snapshot()
            .is_some_and(|p| !p.same_output(current))
    }

    /// Size reduction of the current artifact relative to the source.
    pub fn savings_percent(&self) -> Option<f64> {
        self.artifact()
            .map(|a| savings_percent(self.source.size(), a.size()))
    }

    pub fn view(&self, index: usize) -> RecordView {
        RecordView {
            index,
            id: self.id,
            name: self.source.name().to_string(),
            media_type: self.source.media_type().to_string(),
            original_size: self.source.size(),
            original_dimensions: self.dimensions,
            status: self.status(),
            page: self.item.page,
            artifact: self.artifact().map(Artifact::info),
            error: self.error_detail().map(|e| e.to_string()),
            savings_percent: self.savings_percent(),
        }
    }
}

/// Serialisable snapshot of one record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub index: usize,
    pub id: RecordId,
    pub name: String,
    pub media_type: String,
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_dimensions: Option<Dimensions>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_percent: Option<f64>,
}

/// What one adapter call needs from its record, captured at dispatch time.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub id: RecordId,
    pub index: usize,
    pub source: Arc<SourceFile>,
    pub item: ItemParameter,
}

/// Ordered collection of records.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<ProcessingRecord>,
    next_id: u64,
    /// Bumped whenever the batch is replaced or cleared.
    epoch: u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the batch wholesale with one idle record per source.
    pub fn initialize(&mut self, sources: impl IntoIterator<Item = SourceFile>) {
        self.epoch += 1;
        let records: Vec<ProcessingRecord> = sources
            .into_iter()
            .map(|source| {
                let item = ItemParameter::for_source(&source);
                let dimensions = encode::dimensions(source.bytes())
                    .ok()
                    .map(|(width, height)| Dimensions { width, height });
                let id = self.allocate_id();
                ProcessingRecord {
                    id,
                    source: Arc::new(source),
                    dimensions,
                    item,
                    state: RecordState::Idle,
                }
            })
            .collect();
        self.records = records;
    }

    /// Delete the record at `index`, shifting later records down.
    ///
    /// Out-of-bounds indices are a silent no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<ProcessingRecord> {
        if index < self.records.len() {
            Some(self.records.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.epoch += 1;
        self.records.clear();
    }

    /// Change the per-item parameter of one record. Status and artifact are
    /// left untouched.
    pub fn update_item_parameter(
        &mut self,
        index: usize,
        value: ItemParameter,
    ) -> Result<(), PipelineError> {
        let len = self.records.len();
        let record = self
            .records
            .get_mut(index)
            .ok_or(PipelineError::IndexOutOfBounds { index, len })?;

        match value.page {
            Some(0) => {
                return Err(PipelineError::invalid("page", "pages are 1-based, got 0"));
            }
            Some(_) if !record.source.is_paginated() => {
                return Err(PipelineError::invalid(
                    "page",
                    format!("'{}' is not a paginated document", record.source.name()),
                ));
            }
            _ => {}
        }
        record.item = value;
        Ok(())
    }

    /// Apply a settled outcome to the record at `index`.
    pub fn set_record_outcome(
        &mut self,
        index: usize,
        outcome: Outcome,
        params: ProcessingParameters,
        retain_on_failure: bool,
    ) -> Result<(), PipelineError> {
        let len = self.records.len();
        let record = self
            .records
            .get_mut(index)
            .ok_or(PipelineError::IndexOutOfBounds { index, len })?;
        apply_outcome(&mut record.state, outcome, params, retain_on_failure);
        Ok(())
    }

    /// Apply a settled outcome to the record with identity `id`.
    ///
    /// Returns `false` (and changes nothing) when that record no longer
    /// exists.
    pub fn settle(
        &mut self,
        id: RecordId,
        outcome: Outcome,
        params: ProcessingParameters,
        retain_on_failure: bool,
    ) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                apply_outcome(&mut record.state, outcome, params, retain_on_failure);
                true
            }
            None => false,
        }
    }

    /// Move every record to `Processing`, clearing previous errors, and
    /// capture what each adapter call needs.
    pub fn begin_processing(&mut self) -> Vec<Dispatch> {
        self.records
            .iter_mut()
            .enumerate()
            .map(|(index, record)| {
                let previous = std::mem::replace(&mut record.state, RecordState::Idle);
                record.state = RecordState::Processing {
                    retained: previous.into_derivation(),
                };
                Dispatch {
                    id: record.id,
                    index,
                    source: Arc::clone(&record.source),
                    item: record.item,
                }
            })
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&ProcessingRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessingRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn any_succeeded(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.status() == Status::Succeeded)
    }

    /// Sources in batch order.
    pub fn sources(&self) -> Vec<SourceFile> {
        self.records.iter().map(|r| (*r.source).clone()).collect()
    }

    pub fn totals(&self) -> BatchTotals {
        self.records
            .iter()
            .filter_map(|r| r.artifact().map(|a| (r.source.size(), a.size())))
            .fold(BatchTotals::default(), |mut t, (orig, out)| {
                t.records += 1;
                t.original_bytes += orig;
                t.output_bytes += out;
                t
            })
    }

    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }
}

/// Single assignment so no partially-updated state is ever observable.
fn apply_outcome(
    state: &mut RecordState,
    outcome: Outcome,
    params: ProcessingParameters,
    retain_on_failure: bool,
) {
    let previous = std::mem::replace(state, RecordState::Idle);
    *state = match outcome {
        Ok(artifact) => RecordState::Succeeded(Derivation { artifact, params }),
        Err(reason) => RecordState::Failed {
            reason,
            retained: if retain_on_failure {
                previous.into_derivation()
            } else {
                None
            },
        },
    };
}
