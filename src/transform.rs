//! dF/F computation: the zero-unit fallback, the transform seam and the
//! default rolling-median transform.

use log::{debug, warn};

use crate::config::DffParams;
use crate::data::model::{DffOutput, NoiseEstimate, OutputBundle, TraceMatrix};
use crate::error::{Result, StageError};
use crate::stats;

// ---------------------------------------------------------------------------
// Transform seam
// ---------------------------------------------------------------------------

/// Baseline/noise estimation over a non-empty trace matrix.
///
/// Implementations must return `signal` and `baseline` with the input's shape.
/// `noise` may be per unit or per sample, but must cover every unit.
pub trait DffTransform {
    fn transform(&self, traces: &TraceMatrix) -> Result<DffOutput>;
}

impl<F> DffTransform for F
where
    F: Fn(&TraceMatrix) -> Result<DffOutput>,
{
    fn transform(&self, traces: &TraceMatrix) -> Result<DffOutput> {
        self(traces)
    }
}

/// Run the stage's numerical step.
///
/// Zero units never reach `transform`; see [`normalize_empty`].
pub fn compute(traces: &TraceMatrix, transform: &dyn DffTransform) -> Result<OutputBundle> {
    if traces.is_empty() {
        warn!(
            "no units detected ({} samples); passing traces through unchanged",
            traces.n_samples()
        );
        return Ok(normalize_empty(traces));
    }
    invoke(traces, transform)
}

/// Fallback for a matrix without units: identity signal and baseline, no noise,
/// no skewness.
pub fn normalize_empty(traces: &TraceMatrix) -> OutputBundle {
    OutputBundle {
        signal: traces.clone(),
        baseline: traces.clone(),
        noise: NoiseEstimate::Empty,
        skewness: Vec::new(),
        unit_ids: None,
    }
}

/// Call the transform, enforce its shape contract and compute skewness.
pub fn invoke(traces: &TraceMatrix, transform: &dyn DffTransform) -> Result<OutputBundle> {
    let DffOutput {
        signal,
        baseline,
        noise,
    } = transform.transform(traces)?;

    check_shape("signal", traces.shape(), signal.shape())?;
    check_shape("baseline", traces.shape(), baseline.shape())?;
    check_noise(traces.n_units(), &noise)?;

    let skewness: Vec<f64> = signal.rows().map(stats::skewness).collect();
    debug!("computed skewness for {} units", skewness.len());

    Ok(OutputBundle {
        signal,
        baseline,
        noise,
        skewness,
        unit_ids: None,
    })
}

fn check_shape(what: &str, expected: [usize; 2], got: [usize; 2]) -> Result<()> {
    if expected != got {
        return Err(StageError::TransformFailure(format!(
            "{what} has shape {got:?}, input is {expected:?}"
        )));
    }
    Ok(())
}

fn check_noise(n_units: usize, noise: &NoiseEstimate) -> Result<()> {
    let units = match noise {
        NoiseEstimate::Empty => 0,
        NoiseEstimate::PerUnit(v) => v.len(),
        NoiseEstimate::PerSample(m) => m.n_units(),
    };
    if units != n_units {
        return Err(StageError::TransformFailure(format!(
            "noise covers {units} units, input has {n_units}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Default transform
// ---------------------------------------------------------------------------

/// Running-median baseline with a MAD noise floor.
///
/// * baseline: centred running median over `baseline_window` samples
/// * noise: robust sigma of the trace minus its `noise_window` running median
/// * signal: `(F - F0) / F0`, 0 where `F0 == 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingMedianDff {
    pub baseline_window: usize,
    pub noise_window: usize,
}

impl RollingMedianDff {
    pub fn new(baseline_window: usize, noise_window: usize) -> Self {
        Self {
            baseline_window: baseline_window.max(1),
            noise_window: noise_window.max(1),
        }
    }

    /// Convert the second-based windows in `params` at the given frame rate.
    pub fn from_params(params: &DffParams, frame_rate_hz: f64) -> Self {
        Self::new(
            stats::window_samples(params.baseline_window_s, frame_rate_hz),
            stats::window_samples(params.noise_window_s, frame_rate_hz),
        )
    }
}

impl DffTransform for RollingMedianDff {
    fn transform(&self, traces: &TraceMatrix) -> Result<DffOutput> {
        let (n_units, n_samples) = (traces.n_units(), traces.n_samples());
        let mut signal = Vec::with_capacity(n_units * n_samples);
        let mut baseline = Vec::with_capacity(n_units * n_samples);
        let mut noise = Vec::with_capacity(n_units);
        let mut zero_baseline = 0usize;

        for row in traces.rows() {
            let f0 = stats::running_median(row, self.baseline_window);
            let smooth = stats::running_median(row, self.noise_window);
            let residual: Vec<f64> = row.iter().zip(&smooth).map(|(x, s)| x - s).collect();
            noise.push(stats::robust_std(&residual));

            for (&f, &b) in row.iter().zip(&f0) {
                if b == 0.0 {
                    zero_baseline += 1;
                    signal.push(0.0);
                } else {
                    signal.push((f - b) / b);
                }
            }
            baseline.extend(f0);
        }

        if zero_baseline > 0 {
            warn!("{zero_baseline} samples had a zero baseline; dF/F set to 0 there");
        }

        Ok(DffOutput {
            signal: TraceMatrix::new(n_units, n_samples, signal)?,
            baseline: TraceMatrix::new(n_units, n_samples, baseline)?,
            noise: NoiseEstimate::PerUnit(noise),
        })
    }
}
