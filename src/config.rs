//! Per-deployment stage configuration.
//!
//! The upstream producers this stage has been run behind differ in directory
//! names, dataset field names and output naming. Those differences live here
//! as data rather than as separate code paths.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How to pick among several files matching the same pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Sort candidates by path and take the first; extra matches are ignored.
    #[default]
    FirstMatch,
    /// Fail when more than one candidate matches.
    Unique,
}

/// Where the experiment identifier comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExperimentIdRule {
    /// Name of the directory holding the upstream stage directory.
    #[default]
    ExperimentDir,
    /// Trace file name up to the first `_`.
    FilenamePrefix,
}

/// File naming inside `<output>/<experiment_id>/dff/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLayout {
    /// `dff.parquet`
    #[default]
    Fixed,
    /// `<experiment_id>_dff.parquet`
    ExperimentPrefixed,
}

/// What to do when the shared processing record cannot be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProvenancePolicy {
    /// Abort the run with `ProvenanceMissing`.
    #[default]
    Fatal,
    /// Log a warning and finish without recording.
    Skip,
}

/// Known upstream producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    #[default]
    NeuropilCorrection,
    Extraction,
}

/// Parameters of the default rolling-median transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DffParams {
    /// Movie frame rate; taken from the upstream record when unset.
    pub frame_rate_hz: Option<f64>,
    pub baseline_window_s: f64,
    pub noise_window_s: f64,
}

impl DffParams {
    pub const FALLBACK_FRAME_RATE_HZ: f64 = 30.0;
}

impl Default for DffParams {
    fn default() -> Self {
        Self {
            frame_rate_hz: None,
            baseline_window_s: 60.0,
            noise_window_s: 3.333,
        }
    }
}

/// Everything that varies between deployments of the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Upstream stage directory one level below each experiment directory.
    pub stage_dir: String,
    /// Glob for the trace container inside `stage_dir`.
    pub trace_pattern: String,
    /// Glob for the processing record relative to the experiment directory.
    pub record_pattern: String,
    /// Dataset holding the 2-D trace matrix.
    pub input_field: String,
    /// Dataset holding unit identifiers, if the producer writes one.
    pub unit_id_field: Option<String>,
    pub experiment_id_rule: ExperimentIdRule,
    pub match_policy: MatchPolicy,
    pub output_layout: OutputLayout,
    /// Copy the upstream processing record into the output tree before appending.
    pub copy_siblings: bool,
    pub provenance_policy: ProvenancePolicy,
    pub dff: DffParams,
}

impl StageConfig {
    pub fn for_variant(variant: Variant) -> Self {
        match variant {
            Variant::NeuropilCorrection => Self {
                stage_dir: "neuropil_correction".into(),
                trace_pattern: "neuropil_correction.parquet".into(),
                record_pattern: "processing.json".into(),
                input_field: "FC".into(),
                unit_id_field: Some("roi_names".into()),
                experiment_id_rule: ExperimentIdRule::ExperimentDir,
                match_policy: MatchPolicy::FirstMatch,
                output_layout: OutputLayout::Fixed,
                copy_siblings: true,
                provenance_policy: ProvenancePolicy::Fatal,
                dff: DffParams::default(),
            },
            Variant::Extraction => Self {
                stage_dir: "extraction".into(),
                trace_pattern: "*extraction.parquet".into(),
                record_pattern: "extraction/processing.json".into(),
                input_field: "traces/corrected".into(),
                unit_id_field: None,
                experiment_id_rule: ExperimentIdRule::ExperimentDir,
                match_policy: MatchPolicy::FirstMatch,
                output_layout: OutputLayout::ExperimentPrefixed,
                copy_siblings: false,
                provenance_policy: ProvenancePolicy::Fatal,
                dff: DffParams::default(),
            },
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::for_variant(Variant::default())
    }
}

/// Strings injected by the deployment environment and recorded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnvironment {
    pub software_version: String,
    pub code_url: String,
}
