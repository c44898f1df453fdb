//! Shared, append-only processing record.
//!
//! Every pipeline stage of an experiment appends one step to the same
//! `processing.json`. Steps already present are never edited, removed or
//! reordered; the document's other keys keep their order.
//!
//! Writes go to a temporary file in the target directory which is then renamed
//! over the record, so a crash leaves either the old record or the new one.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::config::ProvenancePolicy;
use crate::error::{Result, StageError, StoreError};
use crate::layout;

pub const STEP_NAME: &str = "dF/F estimation";

const PIPELINE_KEY: &str = "processing_pipeline";
const STEPS_KEY: &str = "data_processes";

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One processing step as stored in the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub name: String,
    pub software_version: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub input_location: String,
    pub output_location: String,
    pub code_url: String,
    pub parameters: Value,
}

/// A step whose end time is not known yet.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub software_version: String,
    pub start_date_time: DateTime<Utc>,
    pub input_location: PathBuf,
    pub output_location: PathBuf,
    pub code_url: String,
    pub parameters: Value,
}

impl StepDraft {
    pub fn finish(self, end_date_time: DateTime<Utc>) -> ProcessingStep {
        ProcessingStep {
            name: STEP_NAME.to_string(),
            software_version: self.software_version,
            start_date_time: self.start_date_time,
            end_date_time,
            input_location: self.input_location.display().to_string(),
            output_location: self.output_location.display().to_string(),
            code_url: self.code_url,
            parameters: self.parameters,
        }
    }
}

// ---------------------------------------------------------------------------
// Record document
// ---------------------------------------------------------------------------

/// Where the step array sits in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepsLocation {
    /// `processing_pipeline.data_processes`
    Pipeline,
    /// Top-level `data_processes` (older records).
    TopLevel,
}

/// A parsed processing record. Unknown keys are kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRecord {
    document: Map<String, Value>,
    location: StepsLocation,
}

impl ProcessingRecord {
    pub fn from_value(value: Value, path: &Path) -> Result<Self> {
        let invalid = |reason: &str| StageError::ProvenanceInvalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let Value::Object(document) = value else {
            return Err(invalid("top level is not an object"));
        };

        let nested = document
            .get(PIPELINE_KEY)
            .and_then(|p| p.get(STEPS_KEY))
            .is_some_and(Value::is_array);
        let location = if nested {
            StepsLocation::Pipeline
        } else if document.get(STEPS_KEY).is_some_and(Value::is_array) {
            StepsLocation::TopLevel
        } else {
            return Err(invalid("no data_processes array"));
        };

        Ok(Self { document, location })
    }

    /// Parse the record at `path`; a missing file is `ProvenanceMissing`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StageError::ProvenanceMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(StageError::read(path, e)),
        };
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| StageError::ProvenanceInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::from_value(value, path)
    }

    pub fn location(&self) -> StepsLocation {
        self.location
    }

    fn steps_value(&self) -> Option<&Vec<Value>> {
        match self.location {
            StepsLocation::Pipeline => self.document.get(PIPELINE_KEY)?.get(STEPS_KEY)?.as_array(),
            StepsLocation::TopLevel => self.document.get(STEPS_KEY)?.as_array(),
        }
    }

    fn steps_value_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self.location {
            StepsLocation::Pipeline => self
                .document
                .get_mut(PIPELINE_KEY)?
                .get_mut(STEPS_KEY)?
                .as_array_mut(),
            StepsLocation::TopLevel => self.document.get_mut(STEPS_KEY)?.as_array_mut(),
        }
    }

    /// Steps in the order they were appended.
    pub fn steps(&self) -> &[Value] {
        self.steps_value().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add `step` after every existing step.
    pub fn append(&mut self, step: &ProcessingStep) -> Result<()> {
        let value = serde_json::to_value(step).map_err(|e| StageError::ProvenanceInvalid {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        let steps = self
            .steps_value_mut()
            .ok_or_else(|| StageError::ProvenanceInvalid {
                path: PathBuf::new(),
                reason: "no data_processes array".into(),
            })?;
        steps.push(value);
        Ok(())
    }

    /// Frame rate recorded by an upstream step, if any step carries one.
    pub fn frame_rate_hz(&self) -> Option<f64> {
        self.steps().iter().find_map(|step| {
            step.get("parameters")?
                .get("movie_frame_rate_hz")?
                .as_f64()
        })
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.document.clone())
    }

    /// Pretty JSON with four-space indentation and a trailing newline.
    pub fn to_pretty_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.document.serialize(&mut ser)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Append log
// ---------------------------------------------------------------------------

/// The on-disk record for one experiment.
///
/// Contract: [`AppendLog::append_from`] reads a record, appends one step and
/// replaces this log's file by rename. Concurrent writers to the same log are
/// not coordinated; each experiment is expected to have its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendLog {
    path: PathBuf,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ProcessingRecord> {
        ProcessingRecord::load(&self.path)
    }

    /// Append in place.
    pub fn append(&self, draft: StepDraft) -> Result<ProcessingRecord> {
        self.append_from(&self.path, draft)
    }

    /// Read the record at `source`, append the step and write the merged record
    /// to this log. The step's end time is taken just before the write.
    pub fn append_from(&self, source: &Path, draft: StepDraft) -> Result<ProcessingRecord> {
        let mut record = ProcessingRecord::load(source)?;
        let before = record.steps().len();

        let step = draft.finish(Utc::now());
        record.append(&step).map_err(|e| with_path(e, source))?;
        self.write(&record)?;

        info!(
            "appended step {} to {} ({before} -> {} steps)",
            before + 1,
            self.path.display(),
            record.steps().len()
        );
        Ok(record)
    }

    /// Replace the log's file with `record`.
    pub fn write(&self, record: &ProcessingRecord) -> Result<()> {
        let bytes = record
            .to_pretty_bytes()
            .map_err(|e| StageError::write(&self.path, e))?;
        self.write_bytes(&bytes)
    }

    /// Seed this log with a copy of another stage's record.
    pub fn copy_from(&self, source: &Path) -> Result<()> {
        let bytes = match fs::read(source) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StageError::ProvenanceMissing {
                    path: source.to_path_buf(),
                })
            }
            Err(e) => return Err(StageError::read(source, e)),
        };
        self.write_bytes(&bytes)?;
        info!("copied {} to {}", source.display(), self.path.display());
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => layout::provision(dir)?,
            _ => PathBuf::from("."),
        };
        write_atomic(&dir, &self.path, bytes).map_err(|e| StageError::write(&self.path, e))
    }
}

/// Temp-file-and-rename. The replacement keeps the permissions of the file it
/// replaces; a new file gets `0o644` on Unix.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::result::Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    match fs::metadata(path) {
        Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
        Err(e) if e.kind() == ErrorKind::NotFound => set_default_mode(tmp.as_file())?,
        Err(e) => return Err(e.into()),
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_default_mode(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_mode(_file: &File) -> io::Result<()> {
    Ok(())
}

fn with_path(err: StageError, path: &Path) -> StageError {
    match err {
        StageError::ProvenanceInvalid { reason, .. } => StageError::ProvenanceInvalid {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    }
}

/// Append under `policy`: a missing record is fatal or skipped.
pub fn record_step(
    log: &AppendLog,
    source: &Path,
    draft: StepDraft,
    policy: ProvenancePolicy,
) -> Result<Option<ProcessingRecord>> {
    match log.append_from(source, draft) {
        Ok(record) => Ok(Some(record)),
        Err(StageError::ProvenanceMissing { path }) if policy == ProvenancePolicy::Skip => {
            warn!(
                "no processing record at {}; skipping provenance",
                path.display()
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
