use super::store::Dataset;
use crate::error::StageError;

// ---------------------------------------------------------------------------
// TraceMatrix – units × samples
// ---------------------------------------------------------------------------

/// Dense 2-D trace matrix: one row per unit (ROI), one column per time sample.
/// Zero rows is a legal, meaningful state (no units detected upstream).
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMatrix {
    n_units: usize,
    n_samples: usize,
    values: Vec<f64>,
}

impl TraceMatrix {
    /// Build from row-major values; `values.len()` must equal `n_units * n_samples`.
    pub fn new(n_units: usize, n_samples: usize, values: Vec<f64>) -> Result<Self, StageError> {
        let expected = n_units.checked_mul(n_samples).ok_or_else(|| {
            StageError::ShapeMismatch(format!("{n_units}x{n_samples} matrix is too large"))
        })?;
        if values.len() != expected {
            return Err(StageError::ShapeMismatch(format!(
                "{n_units}x{n_samples} matrix needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            n_units,
            n_samples,
            values,
        })
    }

    /// A `0 × n_samples` matrix.
    pub fn empty(n_samples: usize) -> Self {
        Self {
            n_units: 0,
            n_samples,
            values: Vec::new(),
        }
    }

    /// Build from equally sized rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, StageError> {
        let n_samples = rows.first().map_or(0, Vec::len);
        let n_units = rows.len();
        let mut values = Vec::with_capacity(n_units * n_samples);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_samples {
                return Err(StageError::ShapeMismatch(format!(
                    "row {i} has {} samples, expected {n_samples}",
                    row.len()
                )));
            }
            values.extend(row);
        }
        Self::new(n_units, n_samples, values)
    }

    pub fn n_units(&self) -> usize {
        self.n_units
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.n_units, self.n_samples]
    }

    /// True when there are no units.
    pub fn is_empty(&self) -> bool {
        self.n_units == 0
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, unit: usize) -> &[f64] {
        let start = unit * self.n_samples;
        &self.values[start..start + self.n_samples]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_units).map(move |i| self.row(i))
    }

    /// Interpret a 2-D float dataset as a trace matrix.
    pub fn from_dataset(ds: &Dataset) -> Result<Self, StageError> {
        let values = ds.as_floats().ok_or_else(|| {
            StageError::ShapeMismatch(format!("dataset `{}` is not numeric", ds.name))
        })?;
        match ds.shape.as_slice() {
            [units, samples] => Self::new(*units, *samples, values.to_vec()),
            other => Err(StageError::ShapeMismatch(format!(
                "dataset `{}` has shape {other:?}, expected 2 dimensions",
                ds.name
            ))),
        }
    }

    pub fn to_dataset(&self, name: &str) -> Dataset {
        Dataset::float(name, self.shape().to_vec(), self.values.clone())
    }
}

// ---------------------------------------------------------------------------
// NoiseEstimate – shape deliberately independent of the signal
// ---------------------------------------------------------------------------

/// Noise reported by a transform. Producers differ on its shape, so it is not
/// assumed to conform to the signal matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseEstimate {
    /// No value: the transform was not run (zero units).
    Empty,
    /// One scalar per unit.
    PerUnit(Vec<f64>),
    /// One value per unit and sample.
    PerSample(TraceMatrix),
}

impl NoiseEstimate {
    pub fn is_empty(&self) -> bool {
        matches!(self, NoiseEstimate::Empty)
    }

    pub fn to_dataset(&self, name: &str) -> Dataset {
        match self {
            NoiseEstimate::Empty => Dataset::float(name, vec![0], Vec::new()),
            NoiseEstimate::PerUnit(v) => Dataset::float(name, vec![v.len()], v.clone()),
            NoiseEstimate::PerSample(m) => m.to_dataset(name),
        }
    }

    /// Zero-element 1-D data reads back as [`NoiseEstimate::Empty`].
    pub fn from_dataset(ds: &Dataset) -> Result<Self, StageError> {
        let values = ds.as_floats().ok_or_else(|| {
            StageError::ShapeMismatch(format!("dataset `{}` is not numeric", ds.name))
        })?;
        match ds.shape.as_slice() {
            [0] => Ok(NoiseEstimate::Empty),
            [_] => Ok(NoiseEstimate::PerUnit(values.to_vec())),
            [_, _] => Ok(NoiseEstimate::PerSample(TraceMatrix::from_dataset(ds)?)),
            other => Err(StageError::ShapeMismatch(format!(
                "noise dataset has shape {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Transform results and the persisted bundle
// ---------------------------------------------------------------------------

/// What a dF/F transform hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct DffOutput {
    pub signal: TraceMatrix,
    pub baseline: TraceMatrix,
    pub noise: NoiseEstimate,
}

/// Everything written to the output container for one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBundle {
    pub signal: TraceMatrix,
    pub baseline: TraceMatrix,
    pub noise: NoiseEstimate,
    /// Empty when there are no units.
    pub skewness: Vec<f64>,
    /// Unit identifiers carried through from the input untouched.
    pub unit_ids: Option<Dataset>,
}

impl OutputBundle {
    pub fn n_units(&self) -> usize {
        self.signal.n_units()
    }
}
