mod common;

use std::fs;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use ophys_dff::config::ProvenancePolicy;
use ophys_dff::provenance::{record_step, AppendLog, ProcessingRecord, StepDraft, StepsLocation};
use ophys_dff::StageError;
use serde_json::{json, Value};
use tempfile::tempdir;

fn draft() -> StepDraft {
    StepDraft {
        software_version: "0.9.0".into(),
        start_date_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        input_location: PathBuf::from("/data/1/neuropil_correction/neuropil_correction.parquet"),
        output_location: PathBuf::from("/results/1/dff/dff.parquet"),
        code_url: "https://example.org/dff".into(),
        parameters: json!({"frame_rate_hz": 30.0}),
    }
}

fn serialized_steps(value: &Value) -> Vec<String> {
    value["processing_pipeline"]["data_processes"]
        .as_array()
        .expect("steps")
        .iter()
        .map(|s| serde_json::to_string(s).expect("serialize step"))
        .collect()
}

#[test]
fn append_keeps_existing_steps_unchanged() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");

    for k in 0..4 {
        common::write_json(&path, &common::record_with_steps(k));
        let before = serialized_steps(&common::read_json(&path));

        let record = AppendLog::new(&path).append(draft()).expect("append");
        assert_eq!(record.steps().len(), k + 1);

        let after = serialized_steps(&common::read_json(&path));
        assert_eq!(after.len(), k + 1);
        assert_eq!(&after[..k], &before[..]);
    }
}

/// A record as written by another stage, already in four-space layout.
const UPSTREAM_RECORD: &str = r#"{
    "processing_pipeline": {
        "data_processes": [
            {
                "name": "Motion correction",
                "parameters": {
                    "max_shift": 1e-05,
                    "movie_frame_rate_hz": 9.480,
                    "frames": 12345678901234567890123
                }
            }
        ]
    }
}
"#;

#[test]
fn append_keeps_prior_step_text_verbatim() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    fs::write(&path, UPSTREAM_RECORD).expect("write");

    AppendLog::new(&path).append(draft()).expect("append");
    let text = fs::read_to_string(&path).expect("text");

    let end_of_prior = UPSTREAM_RECORD.find("\n        ]").expect("steps end");
    let prior = &UPSTREAM_RECORD[..end_of_prior];
    assert!(text.starts_with(prior), "{text}");
    assert!(text.contains("\"max_shift\": 1e-05"));
    assert!(text.contains("\"movie_frame_rate_hz\": 9.480"));
    assert_eq!(
        ProcessingRecord::load(&path).expect("load").frame_rate_hz(),
        Some(9.48)
    );
}

#[cfg(unix)]
#[test]
fn append_keeps_record_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(&path, &common::record_with_steps(1));

    for mode in [0o644, 0o664] {
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
        AppendLog::new(&path).append(draft()).expect("append");
        let after = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(after, mode);
    }
}

#[cfg(unix)]
#[test]
fn new_record_is_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().expect("dir");
    let source = dir.path().join("in/processing.json");
    let target = dir.path().join("out/processing.json");
    common::write_json(&source, &common::record_with_steps(1));

    AppendLog::new(&target)
        .append_from(&source, draft())
        .expect("append");
    let mode = fs::metadata(&target).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}

#[test]
fn appended_step_has_stage_fields() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(&path, &common::record_with_steps(1));

    AppendLog::new(&path).append(draft()).expect("append");
    let doc = common::read_json(&path);
    let step = &doc["processing_pipeline"]["data_processes"][1];

    assert_eq!(step["name"], "dF/F estimation");
    assert_eq!(step["start_date_time"], "2024-06-01T12:00:00Z");
    assert_eq!(
        step["output_location"],
        "/results/1/dff/dff.parquet"
    );
    let keys: Vec<&str> = step.as_object().expect("object").keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "name",
            "software_version",
            "start_date_time",
            "end_date_time",
            "input_location",
            "output_location",
            "code_url",
            "parameters"
        ]
    );

    let end = step["end_date_time"].as_str().expect("end time");
    let end = chrono::DateTime::parse_from_rfc3339(end).expect("rfc3339");
    assert!(end.with_timezone(&Utc) >= draft().start_date_time);
}

#[test]
fn document_metadata_and_key_order_survive() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(&path, &common::record_with_steps(2));

    AppendLog::new(&path).append(draft()).expect("append");
    let doc = common::read_json(&path);

    let keys: Vec<&str> = doc.as_object().expect("object").keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["describedBy", "schema_version", "processing_pipeline", "analyses", "notes"]
    );
    assert_eq!(
        doc["processing_pipeline"]["processor_full_name"],
        "Multiplane Ophys Processing Pipeline"
    );
    assert!(doc["notes"].is_null());
}

#[test]
fn legacy_top_level_steps_are_supported() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(
        &path,
        &json!({"data_processes": [common::upstream_step("Motion correction", json!({"movie_frame_rate_hz": 11.0}))]}),
    );

    let record = ProcessingRecord::load(&path).expect("load");
    assert_eq!(record.location(), StepsLocation::TopLevel);
    assert_eq!(record.frame_rate_hz(), Some(11.0));

    AppendLog::new(&path).append(draft()).expect("append");
    let doc = common::read_json(&path);
    assert_eq!(doc["data_processes"].as_array().expect("steps").len(), 2);
}

#[test]
fn append_from_writes_to_a_different_location() {
    let dir = tempdir().expect("dir");
    let source = dir.path().join("upstream/processing.json");
    let target = dir.path().join("out/exp/processing.json");
    common::write_json(&source, &common::record_with_steps(2));
    let original = fs::read(&source).expect("read source");

    AppendLog::new(&target)
        .append_from(&source, draft())
        .expect("append");

    assert_eq!(fs::read(&source).expect("source"), original);
    assert_eq!(serialized_steps(&common::read_json(&target)).len(), 3);
}

#[test]
fn write_leaves_no_temporary_files() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(&path, &common::record_with_steps(1));

    AppendLog::new(&path).append(draft()).expect("append");

    let names: Vec<String> = fs::read_dir(dir.path())
        .expect("list")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["processing.json".to_string()]);
}

#[test]
fn written_record_is_indented_with_four_spaces() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    common::write_json(&path, &common::record_with_steps(0));

    AppendLog::new(&path).append(draft()).expect("append");
    let text = fs::read_to_string(&path).expect("text");
    assert!(text.starts_with("{\n    \"describedBy\""));
    assert!(text.ends_with("}\n"));
}

#[test]
fn missing_record_follows_policy() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");
    let log = AppendLog::new(&path);

    let err = record_step(&log, &path, draft(), ProvenancePolicy::Fatal).expect_err("fatal");
    assert!(matches!(err, StageError::ProvenanceMissing { .. }));

    let skipped = record_step(&log, &path, draft(), ProvenancePolicy::Skip).expect("skip");
    assert!(skipped.is_none());
    assert!(!path.exists());
}

#[test]
fn malformed_records_are_rejected_without_overwrite() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("processing.json");

    for body in [&b"{ not json"[..], &b"[1, 2, 3]"[..], &b"{\"notes\": null}"[..]] {
        fs::write(&path, body).expect("write");
        let err = AppendLog::new(&path).append(draft()).expect_err("invalid");
        assert!(matches!(err, StageError::ProvenanceInvalid { .. }), "{err}");
        assert_eq!(fs::read(&path).expect("unchanged"), body);
    }
}

#[test]
fn copy_from_seeds_the_log() {
    let dir = tempdir().expect("dir");
    let source = dir.path().join("in/processing.json");
    let target = dir.path().join("out/processing.json");
    common::write_json(&source, &common::record_with_steps(2));

    let log = AppendLog::new(&target);
    log.copy_from(&source).expect("copy");
    assert_eq!(fs::read(&target).expect("target"), fs::read(&source).expect("source"));

    let err = AppendLog::new(dir.path().join("x/processing.json"))
        .copy_from(&dir.path().join("nope.json"))
        .expect_err("missing");
    assert!(matches!(err, StageError::ProvenanceMissing { .. }));
}
