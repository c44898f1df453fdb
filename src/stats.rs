//! Per-unit statistics used by the default transform and the skewness column.

/// Scale factor turning a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Biased Fisher-Pearson skewness of one trace.
///
/// NaN when the trace is empty or has zero variance.
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.is_empty() {
        return f64::NAN;
    }

    let mean = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n;

    if m2 == 0.0 {
        return f64::NAN;
    }
    m3 / m2.powf(1.5)
}

/// Median of a slice, NaN when empty. Does not reorder the input.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    median_of_sorted(&sorted)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Centred running median. The window shrinks at the edges so the output has
/// the same length as the input.
pub fn running_median(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let half = window.max(1) / 2;

    // Sorted view of the current window, updated incrementally.
    let mut sorted: Vec<f64> = Vec::with_capacity(2 * half + 1);
    let mut lo = 0usize;
    let mut hi = 0usize;
    let mut out = Vec::with_capacity(n);

    for i in 0..n {
        let want_lo = i.saturating_sub(half);
        let want_hi = (i + half + 1).min(n);
        while hi < want_hi {
            let v = values[hi];
            let pos = sorted.partition_point(|x| x.total_cmp(&v).is_lt());
            sorted.insert(pos, v);
            hi += 1;
        }
        while lo < want_lo {
            let v = values[lo];
            let pos = sorted.partition_point(|x| x.total_cmp(&v).is_lt());
            sorted.remove(pos);
            lo += 1;
        }
        out.push(median_of_sorted(&sorted));
    }
    out
}

/// Robust standard deviation: `1.4826 * median(|x - median(x)|)`.
pub fn robust_std(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|x| (x - center).abs()).collect();
    MAD_TO_SIGMA * median(&deviations)
}

/// Convert a duration to an odd sample count of at least one.
pub fn window_samples(seconds: f64, frame_rate_hz: f64) -> usize {
    let raw = (seconds * frame_rate_hz).round();
    let samples = if raw.is_finite() && raw >= 1.0 {
        raw as usize
    } else {
        1
    };
    samples | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skewness_of_symmetric_data_is_zero() {
        let s = skewness(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(s.abs() < 1e-12);
    }

    #[test]
    fn skewness_matches_hand_computation() {
        // mean 1, m2 = 3, m3 = 6 -> 6 / 3^1.5
        let s = skewness(&[0.0, 0.0, 0.0, 4.0]);
        assert!((s - 6.0 / 3f64.powf(1.5)).abs() < 1e-12);
    }

    #[test]
    fn skewness_degenerate_inputs_are_nan() {
        assert!(skewness(&[]).is_nan());
        assert!(skewness(&[2.0, 2.0, 2.0]).is_nan());
    }

    #[test]
    fn running_median_shrinks_at_edges() {
        let out = running_median(&[5.0, 1.0, 4.0, 2.0, 3.0], 3);
        assert_eq!(out, vec![3.0, 4.0, 2.0, 3.0, 2.5]);
    }

    #[test]
    fn running_median_window_one_is_identity() {
        let data = [3.0, -1.0, 7.5];
        assert_eq!(running_median(&data, 1), data.to_vec());
    }

    #[test]
    fn running_median_matches_naive() {
        let data: Vec<f64> = (0..40).map(|i| ((i * 37) % 11) as f64 - 5.0).collect();
        let window = 7;
        let fast = running_median(&data, window);
        for (i, got) in fast.iter().enumerate() {
            let lo = i.saturating_sub(window / 2);
            let hi = (i + window / 2 + 1).min(data.len());
            assert_eq!(*got, median(&data[lo..hi]), "index {i}");
        }
    }

    #[test]
    fn robust_std_ignores_outlier() {
        let data = [1.0, 2.0, 3.0, 4.0, 1000.0];
        assert!((robust_std(&data) - MAD_TO_SIGMA).abs() < 1e-12);
    }

    #[test]
    fn window_samples_is_odd_and_positive() {
        assert_eq!(window_samples(60.0, 30.0), 1801);
        assert_eq!(window_samples(3.333, 30.0), 101);
        assert_eq!(window_samples(0.0, 30.0), 1);
        assert_eq!(window_samples(1.0, f64::NAN), 1);
    }
}
