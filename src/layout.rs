//! Output tree layout and directory provisioning.
//!
//! ```text
//! <output>/
//!   <experiment_id>/
//!     processing.json
//!     dff/
//!       dff.parquet | <experiment_id>_dff.parquet
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::OutputLayout;
use crate::error::{Result, StageError};

pub const STAGE_DIR: &str = "dff";
pub const RECORD_FILE: &str = "processing.json";
pub const BUNDLE_EXTENSION: &str = "parquet";

/// Output locations for one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub experiment_dir: PathBuf,
    pub stage_dir: PathBuf,
    pub bundle: PathBuf,
    pub record: PathBuf,
}

impl OutputPaths {
    pub fn new(output_root: &Path, experiment_id: &str, layout: OutputLayout) -> Self {
        let experiment_dir = output_root.join(experiment_id);
        let stage_dir = experiment_dir.join(STAGE_DIR);
        let file_name = match layout {
            OutputLayout::Fixed => format!("dff.{BUNDLE_EXTENSION}"),
            OutputLayout::ExperimentPrefixed => format!("{experiment_id}_dff.{BUNDLE_EXTENSION}"),
        };
        Self {
            bundle: stage_dir.join(file_name),
            record: experiment_dir.join(RECORD_FILE),
            experiment_dir,
            stage_dir,
        }
    }
}

/// Create `dir` and any missing parents. Succeeds if it already exists.
pub fn provision(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| StageError::write(dir, e))?;
    debug!("provisioned {}", dir.display());
    Ok(dir.to_path_buf())
}
