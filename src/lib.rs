//! dF/F estimation stage of a multiplane optical-physiology pipeline.
//!
//! Reads corrected fluorescence traces for one experiment, converts them to
//! dF/F, writes a self-describing output container and appends a step to the
//! experiment's shared processing record.

pub mod bundle;
pub mod config;
pub mod data;
pub mod error;
pub mod layout;
pub mod locate;
pub mod provenance;
pub mod stage;
pub mod stats;
pub mod transform;

pub use config::{OutputLayout, ProvenancePolicy, RunEnvironment, StageConfig, Variant};
pub use data::model::{DffOutput, NoiseEstimate, OutputBundle, TraceMatrix};
pub use error::{StageError, StoreError};
pub use stage::{run, run_with, RunOptions, RunSummary};
pub use transform::{DffTransform, RollingMedianDff};
