use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;

use ophys_dff::config::{
    MatchPolicy, OutputLayout, ProvenancePolicy, RunEnvironment, StageConfig, Variant,
};
use ophys_dff::stage::{self, RunOptions};

/// Compute dF/F for one experiment and record the processing step.
#[derive(Parser, Debug)]
#[command(name = "ophys-dff", version, about)]
struct Cli {
    /// Root holding one directory per experiment.
    #[arg(short, long, default_value = "/data/")]
    input_dir: PathBuf,

    /// Root under which `<experiment_id>/dff/` is created.
    #[arg(short, long, default_value = "/results/")]
    output_dir: PathBuf,

    /// Upstream producer whose layout the input follows.
    #[arg(long, value_enum, default_value_t = Variant::NeuropilCorrection)]
    variant: Variant,

    /// Dataset holding the trace matrix (overrides the variant).
    #[arg(long)]
    input_field: Option<String>,

    /// Output file naming (overrides the variant).
    #[arg(long, value_enum)]
    layout: Option<OutputLayout>,

    /// Behaviour when the processing record is missing.
    #[arg(long, value_enum)]
    provenance_policy: Option<ProvenancePolicy>,

    /// Candidate selection when a pattern matches several files.
    #[arg(long, value_enum)]
    match_policy: Option<MatchPolicy>,

    /// Movie frame rate; read from the upstream record when omitted.
    #[arg(long)]
    frame_rate_hz: Option<f64>,

    /// Software version recorded in the processing step.
    #[arg(long, env = "VERSION", default_value = "")]
    software_version: String,

    /// Code repository recorded in the processing step.
    #[arg(long, env = "DFF_EXTRACTION_URL", default_value = "")]
    code_url: String,
}

impl Cli {
    fn stage_config(&self) -> StageConfig {
        let mut config = StageConfig::for_variant(self.variant);
        if let Some(field) = &self.input_field {
            config.input_field = field.clone();
        }
        if let Some(layout) = self.layout {
            config.output_layout = layout;
        }
        if let Some(policy) = self.provenance_policy {
            config.provenance_policy = policy;
        }
        if let Some(policy) = self.match_policy {
            config.match_policy = policy;
        }
        if self.frame_rate_hz.is_some() {
            config.dff.frame_rate_hz = self.frame_rate_hz;
        }
        config
    }
}

fn main() -> Result<()> {
    let started_at = Utc::now();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let opts = RunOptions {
        input_dir: cli.input_dir.clone(),
        output_dir: cli.output_dir.clone(),
        config: cli.stage_config(),
        env: RunEnvironment {
            software_version: cli.software_version.clone(),
            code_url: cli.code_url.clone(),
        },
        started_at,
    }
    .with_absolute_roots()
    .context("resolving input and output directories")?;

    let summary = stage::run(&opts)
        .with_context(|| format!("dF/F stage failed for input {}", opts.input_dir.display()))?;

    info!(
        "experiment {}: {} units -> {}",
        summary.experiment_id,
        summary.n_units,
        summary.bundle.display()
    );
    Ok(())
}
