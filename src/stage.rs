//! One dF/F run: locate → compute → write bundle → record provenance.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::json;

use crate::bundle;
use crate::config::{DffParams, RunEnvironment, StageConfig};
use crate::data::model::TraceMatrix;
use crate::data::store::{Dataset, DatasetStore};
use crate::error::{Result, StageError};
use crate::layout::OutputPaths;
use crate::locate::{self, LocatedArtifacts};
use crate::provenance::{self, AppendLog, ProcessingRecord, StepDraft};
use crate::transform::{self, DffTransform, RollingMedianDff};

/// Inputs of a single invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config: StageConfig,
    pub env: RunEnvironment,
    /// Wall-clock time at process entry.
    pub started_at: DateTime<Utc>,
}

impl RunOptions {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            config: StageConfig::default(),
            env: RunEnvironment::default(),
            started_at: Utc::now(),
        }
    }

    /// Resolve both roots against the current directory so that recorded
    /// locations are absolute.
    pub fn with_absolute_roots(mut self) -> std::io::Result<Self> {
        self.input_dir = std::path::absolute(&self.input_dir)?;
        self.output_dir = std::path::absolute(&self.output_dir)?;
        Ok(self)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub experiment_id: String,
    pub trace_file: PathBuf,
    pub bundle: PathBuf,
    /// `None` when provenance was skipped by policy.
    pub record: Option<PathBuf>,
    pub n_units: usize,
    pub n_samples: usize,
    pub frame_rate_hz: f64,
}

/// Run with the default rolling-median transform.
pub fn run(opts: &RunOptions) -> Result<RunSummary> {
    run_with(opts, None)
}

/// Run with an explicit transform, or the default one when `None`.
pub fn run_with(opts: &RunOptions, transform: Option<&dyn DffTransform>) -> Result<RunSummary> {
    let config = &opts.config;
    let located = locate::locate(&opts.input_dir, config)?;
    info!("calculating dF/F for experiment {}", located.experiment_id);

    let (traces, unit_ids) = read_traces(&located.trace_file, config)?;
    info!(
        "read {} units x {} samples from `{}`",
        traces.n_units(),
        traces.n_samples(),
        config.input_field
    );

    let upstream = located.record.as_deref().and_then(|path| {
        ProcessingRecord::load(path)
            .map_err(|e| debug!("upstream record not usable for parameters: {e}"))
            .ok()
    });
    let frame_rate_hz = resolve_frame_rate(&config.dff, upstream.as_ref());

    let default_transform = RollingMedianDff::from_params(&config.dff, frame_rate_hz);
    let dff: &dyn DffTransform = match transform {
        Some(t) => t,
        None => &default_transform,
    };

    let mut output = transform::compute(&traces, dff)?;
    output.unit_ids = unit_ids;

    let paths = OutputPaths::new(&opts.output_dir, &located.experiment_id, config.output_layout);
    bundle::write_bundle(&output, &paths.bundle)?;

    let record = record_provenance(opts, &located, &paths, frame_rate_hz)?;

    Ok(RunSummary {
        experiment_id: located.experiment_id,
        trace_file: located.trace_file,
        bundle: paths.bundle,
        record,
        n_units: traces.n_units(),
        n_samples: traces.n_samples(),
        frame_rate_hz,
    })
}

/// Load the trace matrix and, when configured and present, the unit ids.
pub fn read_traces(path: &Path, config: &StageConfig) -> Result<(TraceMatrix, Option<Dataset>)> {
    let store = DatasetStore::read(path)?;
    let traces = TraceMatrix::from_dataset(store.require(&config.input_field, path)?)?;

    let unit_ids = match &config.unit_id_field {
        Some(field) => match store.get(field) {
            Some(ids) => Some(ids.clone()),
            None => {
                warn!("no `{field}` dataset in {}; unit ids omitted", path.display());
                None
            }
        },
        None => None,
    };

    if let Some(ids) = &unit_ids {
        if ids.shape.len() != 1 || ids.leading_len() != traces.n_units() {
            return Err(StageError::ShapeMismatch(format!(
                "`{}` has shape {:?} but there are {} units",
                ids.name,
                ids.shape,
                traces.n_units()
            )));
        }
    }

    Ok((traces, unit_ids))
}

/// Configured rate, else the upstream record's, else the fallback.
pub fn resolve_frame_rate(params: &DffParams, upstream: Option<&ProcessingRecord>) -> f64 {
    if let Some(rate) = params.frame_rate_hz {
        return rate;
    }
    match upstream.and_then(ProcessingRecord::frame_rate_hz) {
        Some(rate) => rate,
        None => {
            warn!(
                "no movie_frame_rate_hz available; assuming {} Hz",
                DffParams::FALLBACK_FRAME_RATE_HZ
            );
            DffParams::FALLBACK_FRAME_RATE_HZ
        }
    }
}

fn record_provenance(
    opts: &RunOptions,
    located: &LocatedArtifacts,
    paths: &OutputPaths,
    frame_rate_hz: f64,
) -> Result<Option<PathBuf>> {
    let config = &opts.config;
    let log = AppendLog::new(&paths.record);

    let source = match (&located.record, config.copy_siblings) {
        (Some(upstream), true) => {
            log.copy_from(upstream)?;
            paths.record.clone()
        }
        (Some(upstream), false) => upstream.clone(),
        (None, _) => paths.record.clone(),
    };

    let draft = StepDraft {
        software_version: opts.env.software_version.clone(),
        start_date_time: opts.started_at,
        input_location: located.trace_file.clone(),
        output_location: paths.bundle.clone(),
        code_url: opts.env.code_url.clone(),
        parameters: json!({
            "input_dir": opts.input_dir.display().to_string(),
            "output_dir": opts.output_dir.display().to_string(),
            "frame_rate_hz": frame_rate_hz,
            "config": config,
        }),
    };

    let record = provenance::record_step(&log, &source, draft, config.provenance_policy)?;
    Ok(record.map(|_| paths.record.clone()))
}
