//! Resolve upstream artifacts inside a loosely structured input tree.
//!
//! ```text
//! <input>/
//!   <experiment_id>/
//!     processing.json            record_pattern (optional)
//!     <stage_dir>/
//!       <trace file>             trace_pattern
//! ```

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::{ExperimentIdRule, MatchPolicy, StageConfig};
use crate::error::{Result, StageError};

/// Upstream files resolved for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifacts {
    pub experiment_id: String,
    pub experiment_dir: PathBuf,
    pub stage_dir: PathBuf,
    pub trace_file: PathBuf,
    /// Shared processing record written by earlier stages, if present.
    pub record: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    fn matches(self, path: &Path) -> bool {
        match self {
            EntryKind::File => path.is_file(),
            EntryKind::Dir => path.is_dir(),
        }
    }
}

/// Find the trace container, derive the experiment id and look for the
/// processing record. Fails before anything is written.
pub fn locate(input_root: &Path, config: &StageConfig) -> Result<LocatedArtifacts> {
    let stage_pattern = format!("*/{}", config.stage_dir);
    let stage_dir = find_one(input_root, &stage_pattern, EntryKind::Dir, config.match_policy)?;
    let trace_file = find_one(
        &stage_dir,
        &config.trace_pattern,
        EntryKind::File,
        config.match_policy,
    )?;

    let experiment_dir = stage_dir
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| StageError::InvalidExperimentId {
            path: stage_dir.clone(),
        })?;
    let experiment_id = experiment_id(config.experiment_id_rule, &stage_dir, &trace_file)?;

    let record = find_optional(
        &experiment_dir,
        &config.record_pattern,
        EntryKind::File,
        config.match_policy,
    )?;

    info!(
        "located experiment {experiment_id}: traces {}, record {}",
        trace_file.display(),
        record
            .as_deref()
            .map_or_else(|| "<none>".to_string(), |p| p.display().to_string())
    );

    Ok(LocatedArtifacts {
        experiment_id,
        experiment_dir,
        stage_dir,
        trace_file,
        record,
    })
}

/// All entries of `kind` matching `root/pattern`, sorted by path.
pub fn candidates(root: &Path, pattern: &str, kind: EntryKind) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&root.to_string_lossy());
    let full = Path::new(&escaped).join(pattern).to_string_lossy().into_owned();
    let paths = glob::glob(&full).map_err(|e| StageError::InvalidPattern {
        pattern: full.clone(),
        reason: e.to_string(),
    })?;

    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            StageError::read(path, e.into_error())
        })?;
        if kind.matches(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Exactly one path under the given policy; `ArtifactNotFound` when none match.
pub fn find_one(
    root: &Path,
    pattern: &str,
    kind: EntryKind,
    policy: MatchPolicy,
) -> Result<PathBuf> {
    find_optional(root, pattern, kind, policy)?.ok_or_else(|| StageError::ArtifactNotFound {
        root: root.to_path_buf(),
        pattern: pattern.to_string(),
    })
}

/// Like [`find_one`] but absence is not an error.
pub fn find_optional(
    root: &Path,
    pattern: &str,
    kind: EntryKind,
    policy: MatchPolicy,
) -> Result<Option<PathBuf>> {
    let found = candidates(root, pattern, kind)?;
    if found.len() > 1 {
        match policy {
            MatchPolicy::FirstMatch => debug!(
                "{} candidates for `{pattern}` under {}, taking {}",
                found.len(),
                root.display(),
                found[0].display()
            ),
            MatchPolicy::Unique => {
                return Err(StageError::AmbiguousArtifact {
                    root: root.to_path_buf(),
                    pattern: pattern.to_string(),
                    count: found.len(),
                })
            }
        }
    }
    Ok(found.into_iter().next())
}

/// Derive the experiment id other stages key their output on.
pub fn experiment_id(rule: ExperimentIdRule, stage_dir: &Path, trace_file: &Path) -> Result<String> {
    let id = match rule {
        ExperimentIdRule::ExperimentDir => stage_dir
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .map(str::to_string),
        ExperimentIdRule::FilenamePrefix => {
            let name = trace_file.file_name().and_then(|n| n.to_str());
            match name {
                Some(name) if name.contains('_') => name.split('_').next().map(str::to_string),
                _ => trace_file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string),
            }
        }
    };

    match id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(StageError::InvalidExperimentId {
            path: match rule {
                ExperimentIdRule::ExperimentDir => stage_dir.to_path_buf(),
                ExperimentIdRule::FilenamePrefix => trace_file.to_path_buf(),
            },
        }),
    }
}
