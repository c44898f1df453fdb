#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ophys_dff::data::store::{Dataset, DatasetStore};
use serde_json::{json, Value};

/// Deterministic, strictly positive traces with some structure per unit.
pub fn synthetic_rows(units: usize, samples: usize) -> Vec<Vec<f64>> {
    (0..units)
        .map(|u| {
            (0..samples)
                .map(|t| {
                    let phase = t as f64 * 0.3 + u as f64;
                    let spike = if t % 17 == u % 17 { 40.0 } else { 0.0 };
                    100.0 + 10.0 * u as f64 + 5.0 * phase.sin() + spike
                })
                .collect()
        })
        .collect()
}

/// Write `<root>/<id>/neuropil_correction/neuropil_correction.parquet`.
pub fn write_neuropil_input(root: &Path, id: &str, units: usize, samples: usize) -> PathBuf {
    let stage_dir = root.join(id).join("neuropil_correction");
    fs::create_dir_all(&stage_dir).expect("create stage dir");

    let values: Vec<f64> = synthetic_rows(units, samples).into_iter().flatten().collect();
    let names: Vec<String> = (0..units).map(|i| format!("roi_{i}")).collect();

    let mut store = DatasetStore::new();
    store.insert(Dataset::float("FC", vec![units, samples], values));
    store.insert(Dataset::text("roi_names", vec![units], names));

    let path = stage_dir.join("neuropil_correction.parquet");
    store.write(&path).expect("write trace container");
    path
}

pub fn upstream_step(name: &str, params: Value) -> Value {
    json!({
        "name": name,
        "software_version": "0.3.1",
        "start_date_time": "2024-05-01T10:00:00.123456Z",
        "end_date_time": "2024-05-01T10:05:00.5Z",
        "input_location": "/data/raw",
        "output_location": "/results/upstream",
        "code_url": "https://example.org/upstream",
        "parameters": params
    })
}

/// A processing record in the current schema with `n` upstream steps.
pub fn record_with_steps(n: usize) -> Value {
    let steps: Vec<Value> = (0..n)
        .map(|i| {
            let params = if i == 0 {
                json!({"movie_frame_rate_hz": 9.48, "max_shift": 0.1})
            } else {
                json!({})
            };
            upstream_step(&format!("step {i}"), params)
        })
        .collect();
    json!({
        "describedBy": "https://example.org/processing.py",
        "schema_version": "1.1.1",
        "processing_pipeline": {
            "data_processes": steps,
            "processor_full_name": "Multiplane Ophys Processing Pipeline",
            "pipeline_version": "0.1.0",
            "pipeline_url": "",
            "note": null
        },
        "analyses": [],
        "notes": null
    })
}

pub fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, serde_json::to_vec_pretty(value).expect("json")).expect("write json");
}

pub fn read_json(path: &Path) -> Value {
    let bytes = fs::read(path).expect("read json");
    serde_json::from_slice(&bytes).expect("parse json")
}
