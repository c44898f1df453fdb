//! The per-experiment dF/F output container.

use std::path::Path;

use log::info;

use crate::data::model::{NoiseEstimate, OutputBundle, TraceMatrix};
use crate::data::store::{Dataset, DatasetStore};
use crate::error::{Result, StageError};
use crate::layout;

pub const DATA_FIELD: &str = "data";
pub const BASELINE_FIELD: &str = "baseline";
pub const NOISE_FIELD: &str = "noise";
pub const SKEWNESS_FIELD: &str = "skewness";
pub const UNIT_IDS_FIELD: &str = "roi_names";

impl OutputBundle {
    pub fn to_store(&self) -> DatasetStore {
        let mut store = DatasetStore::new();
        store.insert(self.signal.to_dataset(DATA_FIELD));
        store.insert(self.baseline.to_dataset(BASELINE_FIELD));
        store.insert(self.noise.to_dataset(NOISE_FIELD));
        store.insert(Dataset::float(
            SKEWNESS_FIELD,
            vec![self.skewness.len()],
            self.skewness.clone(),
        ));
        if let Some(ids) = &self.unit_ids {
            store.insert(Dataset {
                name: UNIT_IDS_FIELD.to_string(),
                ..ids.clone()
            });
        }
        store
    }

    /// Rebuild a bundle from a container; every fixed field must be present.
    pub fn from_store(store: &DatasetStore, path: &Path) -> Result<Self> {
        let signal = TraceMatrix::from_dataset(store.require(DATA_FIELD, path)?)?;
        let baseline = TraceMatrix::from_dataset(store.require(BASELINE_FIELD, path)?)?;
        let noise = NoiseEstimate::from_dataset(store.require(NOISE_FIELD, path)?)?;
        let skewness = store
            .require(SKEWNESS_FIELD, path)?
            .as_floats()
            .ok_or_else(|| StageError::ShapeMismatch("skewness is not numeric".into()))?
            .to_vec();
        let unit_ids = store.get(UNIT_IDS_FIELD).cloned();

        Ok(Self {
            signal,
            baseline,
            noise,
            skewness,
            unit_ids,
        })
    }
}

/// Write the bundle to `path`, creating parent directories. An existing file
/// is replaced wholesale.
pub fn write_bundle(bundle: &OutputBundle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        layout::provision(parent)?;
    }
    bundle.to_store().write(path)?;
    info!(
        "wrote dF/F bundle for {} units to {}",
        bundle.n_units(),
        path.display()
    );
    Ok(())
}

pub fn read_bundle(path: &Path) -> Result<OutputBundle> {
    let store = DatasetStore::read(path)?;
    OutputBundle::from_store(&store, path)
}
