mod common;

use ophys_dff::transform::{compute, normalize_empty, RollingMedianDff};
use ophys_dff::{DffOutput, NoiseEstimate, StageError, TraceMatrix};

#[test]
fn rows_are_preserved_for_any_unit_count() {
    let transform = RollingMedianDff::new(31, 5);
    for n in 1..6 {
        let traces = TraceMatrix::from_rows(common::synthetic_rows(n, 64)).expect("traces");
        let out = compute(&traces, &transform).expect("compute");
        assert_eq!(out.signal.shape(), [n, 64]);
        assert_eq!(out.baseline.shape(), [n, 64]);
        assert_eq!(out.skewness.len(), n);
        assert!(matches!(&out.noise, NoiseEstimate::PerUnit(v) if v.len() == n));
    }
}

#[test]
fn constant_traces_have_zero_dff() {
    let traces = TraceMatrix::from_rows(vec![vec![50.0; 20], vec![0.0; 20]]).expect("traces");
    let out = compute(&traces, &RollingMedianDff::new(5, 3)).expect("compute");
    assert!(out.signal.values().iter().all(|v| *v == 0.0));
    assert_eq!(out.baseline.row(0), &[50.0; 20][..]);
    assert_eq!(out.noise, NoiseEstimate::PerUnit(vec![0.0, 0.0]));
    assert!(out.skewness.iter().all(|s| s.is_nan()));
}

#[test]
fn dff_is_relative_to_baseline() {
    let mut row = vec![100.0; 21];
    row[10] = 150.0;
    let traces = TraceMatrix::from_rows(vec![row]).expect("traces");
    let out = compute(&traces, &RollingMedianDff::new(9, 3)).expect("compute");
    assert!((out.signal.row(0)[10] - 0.5).abs() < 1e-12);
    assert_eq!(out.signal.row(0)[0], 0.0);
    assert!(out.skewness[0] > 0.0);
}

#[test]
fn empty_matrix_uses_the_fallback() {
    let traces = TraceMatrix::empty(100);
    let out = normalize_empty(&traces);
    assert_eq!(out.signal, traces);
    assert_eq!(out.baseline, traces);
    assert!(out.noise.is_empty());
    assert!(out.skewness.is_empty());

    let never = |_: &TraceMatrix| -> Result<DffOutput, StageError> { unreachable!() };
    assert_eq!(compute(&traces, &never).expect("compute"), out);
}

#[test]
fn transform_errors_propagate_unchanged() {
    let traces = TraceMatrix::from_rows(vec![vec![1.0, 2.0]]).expect("traces");
    let failing = |_: &TraceMatrix| -> Result<DffOutput, StageError> {
        Err(StageError::TransformFailure("singular baseline".into()))
    };
    match compute(&traces, &failing) {
        Err(StageError::TransformFailure(msg)) => assert_eq!(msg, "singular baseline"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn shape_contract_violations_are_transform_failures() {
    let traces = TraceMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).expect("traces");

    let short_signal = |t: &TraceMatrix| -> Result<DffOutput, StageError> {
        Ok(DffOutput {
            signal: TraceMatrix::from_rows(vec![vec![0.0, 0.0]])?,
            baseline: t.clone(),
            noise: NoiseEstimate::PerUnit(vec![1.0, 1.0]),
        })
    };
    assert!(matches!(
        compute(&traces, &short_signal),
        Err(StageError::TransformFailure(_))
    ));

    let missing_noise = |t: &TraceMatrix| -> Result<DffOutput, StageError> {
        Ok(DffOutput {
            signal: t.clone(),
            baseline: t.clone(),
            noise: NoiseEstimate::Empty,
        })
    };
    assert!(matches!(
        compute(&traces, &missing_noise),
        Err(StageError::TransformFailure(_))
    ));

    let per_sample = |t: &TraceMatrix| -> Result<DffOutput, StageError> {
        Ok(DffOutput {
            signal: t.clone(),
            baseline: t.clone(),
            noise: NoiseEstimate::PerSample(t.clone()),
        })
    };
    let out = compute(&traces, &per_sample).expect("per-sample noise is accepted");
    assert_eq!(out.skewness.len(), 2);
}
