use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SERIES_META: &str = r#"{"path": "acq1/dicoms", "dsid": "ds-1", "refcommit": "abc123", "metadata": {"dicom": {"Series": [{"SeriesInstanceUID": "1.2.3", "SeriesNumber": 1, "SeriesDescription": "func_task-rest_run-1", "ProtocolName": "func_task-rest_run-1", "PatientID": "02", "ImageType": ["ORIGINAL", "PRIMARY"]}]}}}"#;

const DICOM_SNIPPET: &str = r#"{"type": "dicomseries", "location": "dicoms", "uid": "1.2.3", "dataset_id": "ds-1", "dataset_refcommit": "abc123", "subject": {"value": "02", "approved": true}, "converter": {"value": "heudiconv", "approved": false}}"#;
const EVENTS_SNIPPET: &str = r#"{"type": "generic_file", "location": "beh/events.tsv", "dataset_id": "ds-1", "dataset_refcommit": "abc123", "subject": {"value": "02", "approved": false}, "converter": {"value": "cp {location} {target_dir}/sourcedata/", "approved": true}}"#;
const LOCALIZER_SNIPPET: &str = r#"{"type": "dicomseries", "location": "dicoms", "uid": "1.2.9", "dataset_id": "ds-1", "dataset_refcommit": "abc123", "subject": {"value": "02", "approved": false}, "converter": {"value": "ignore", "approved": true}}"#;

fn hirni(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hirni").unwrap();
    cmd.arg("-d").arg(root).env_remove("HIRNI_DATASET").env_remove("RUST_LOG");
    cmd
}

fn write_spec(root: &Path, lines: &[&str]) {
    fs::create_dir_all(root.join("acq1")).unwrap();
    fs::write(root.join("acq1/studyspec.json"), lines.join("\n") + "\n").unwrap();
}

// ── validate ──

#[test]
fn validate_accepts_a_complete_specification() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET, EVENTS_SNIPPET]);

    hirni(tmp.path())
        .args(["validate", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("specification valid"))
        .stdout(predicate::str::contains("not yet enforced"));
}

#[test]
fn validate_reports_a_missing_location() {
    let tmp = TempDir::new().unwrap();
    let broken = DICOM_SNIPPET.replace(r#""location": "dicoms", "#, "");
    write_spec(tmp.path(), &[EVENTS_SNIPPET, &broken]);

    hirni(tmp.path())
        .args(["validate", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "validate(error): acq1/studyspec.json:2 (snippet missing key 'location' (1.2.3))",
        ))
        .stdout(predicate::str::contains("specification invalid: 1 error(s)"));
}

#[test]
fn validate_flags_unknown_keys_and_types_as_json() {
    let tmp = TempDir::new().unwrap();
    let odd = EVENTS_SNIPPET
        .replace("generic_file", "eeg")
        .replace(r#""subject""#, r#""shoe_size""#);
    write_spec(tmp.path(), &[&odd]);

    hirni(tmp.path())
        .args(["--json", "validate", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""status":"error""#))
        .stdout(predicate::str::contains("unknown key 'shoe_size'"))
        .stdout(predicate::str::contains("unknown specification type 'eeg'"));
}

#[test]
fn validate_missing_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    hirni(tmp.path())
        .args(["validate", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("specification not found"));
}

// ── dicom2spec ──

#[test]
fn dicom2spec_creates_then_keeps_the_specification() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("meta.jsonl"), format!("{SERIES_META}\n")).unwrap();
    let args = ["dicom2spec", "meta.jsonl", "--spec", "acq1/studyspec.json"];

    hirni(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("dicom2spec(ok): dicoms (1.2.3)"));

    let spec = fs::read_to_string(tmp.path().join("acq1/studyspec.json")).unwrap();
    assert_eq!(spec.lines().count(), 1);
    assert!(spec.contains(r#""uid":"1.2.3""#));
    assert!(spec.contains(r#""location":"dicoms""#));
    assert!(spec.contains(r#""dataset_id":"ds-1""#));

    hirni(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("dicom2spec(notneeded): dicoms (1.2.3)"));
    assert_eq!(
        fs::read_to_string(tmp.path().join("acq1/studyspec.json")).unwrap(),
        spec
    );
}

#[test]
fn dicom2spec_without_dicom_metadata_is_not_needed() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("meta.json"),
        r#"{"path": "acq1/physio", "dsid": "ds-2", "refcommit": "def", "metadata": {}}"#,
    )
    .unwrap();

    hirni(tmp.path())
        .args(["dicom2spec", "meta.json", "--spec", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dicom2spec(notneeded): acq1/physio"));
    assert!(!tmp.path().join("acq1/studyspec.json").exists());
}

#[test]
fn dicom2spec_without_series_is_impossible() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("meta.json"),
        r#"{"path": "acq1/dicoms", "dsid": "ds-1", "refcommit": "abc", "metadata": {"dicom": {"Series": []}}}"#,
    )
    .unwrap();

    hirni(tmp.path())
        .args(["dicom2spec", "meta.json", "--spec", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("no image series detected"));
}

// ── spec4anything ──

#[test]
fn spec4anything_adds_generic_entries_once() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET]);
    fs::create_dir_all(tmp.path().join("acq1/beh")).unwrap();
    fs::write(tmp.path().join("acq1/beh/events.tsv"), "onset\tduration\n").unwrap();
    let args = [
        "spec4anything",
        "acq1/beh/events.tsv",
        "--dataset-id",
        "ds-1",
        "--refcommit",
        "abc123",
    ];

    hirni(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("spec4anything(ok): beh/events.tsv"));

    let spec = fs::read_to_string(tmp.path().join("acq1/studyspec.json")).unwrap();
    let added = spec
        .lines()
        .find(|l| l.contains(r#""location":"beh/events.tsv""#))
        .unwrap();
    assert!(added.contains(r#""type":"generic_file""#));
    // Seeded from the specification's uniform subject, unapproved.
    assert!(added.contains(r#""subject":{"approved":false,"value":"02"}"#));

    hirni(tmp.path())
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("spec4anything(notneeded): beh/events.tsv"));
}

#[test]
fn spec4anything_keeps_series_only_values_out_of_generic_entries() {
    let tmp = TempDir::new().unwrap();
    let numbered = DICOM_SNIPPET.replace(
        r#""subject""#,
        r#""id": {"value": 401, "approved": false}, "acquisition": {"value": "anat", "approved": false}, "subject""#,
    );
    write_spec(tmp.path(), &[&numbered]);
    fs::create_dir_all(tmp.path().join("acq1/beh")).unwrap();
    fs::write(tmp.path().join("acq1/beh/events.tsv"), "onset\tduration\n").unwrap();

    hirni(tmp.path())
        .args([
            "spec4anything",
            "acq1/beh/events.tsv",
            "--dataset-id",
            "ds-1",
            "--refcommit",
            "abc123",
            "--properties",
            r#"{"converter": "ignore"}"#,
        ])
        .assert()
        .success();

    let spec = fs::read_to_string(tmp.path().join("acq1/studyspec.json")).unwrap();
    let added = spec
        .lines()
        .find(|l| l.contains(r#""location":"beh/events.tsv""#))
        .unwrap();
    assert!(!added.contains(r#""id""#));
    assert!(!added.contains(r#""acquisition""#));

    hirni(tmp.path())
        .args(["validate", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("specification valid"));
}

#[test]
fn spec4anything_collapses_duplicate_entries() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET, EVENTS_SNIPPET, EVENTS_SNIPPET]);
    fs::create_dir_all(tmp.path().join("acq1/beh")).unwrap();
    fs::write(tmp.path().join("acq1/beh/events.tsv"), "onset\tduration\n").unwrap();

    hirni(tmp.path())
        .args([
            "spec4anything",
            "acq1/beh/events.tsv",
            "--dataset-id",
            "ds-1",
            "--refcommit",
            "abc123",
        ])
        .assert()
        .success();

    let spec = fs::read_to_string(tmp.path().join("acq1/studyspec.json")).unwrap();
    let entries = spec
        .lines()
        .filter(|l| l.contains(r#""location":"beh/events.tsv""#))
        .count();
    assert_eq!(entries, 1);
    // the curated converter survives the collapse
    assert!(spec.contains("sourcedata"));
}

#[test]
fn spec4anything_needs_an_acquisition() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("README"), "study\n").unwrap();

    hirni(tmp.path())
        .args(["spec4anything", "README", "--dataset-id", "d", "--refcommit", "c"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("path not inside an acquisition"));
}

// ── spec2bids ──

#[test]
fn spec2bids_dry_run_prints_the_plan() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET, LOCALIZER_SNIPPET, EVENTS_SNIPPET]);

    hirni(tmp.path())
        .args(["spec2bids", "--dry-run", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[conversion] heudiconv -f hirni -s 02 -c dcm2niix -o hirni-tmp-",
        ))
        .stdout(predicate::str::contains("--minmeta --files acq1/dicoms"))
        .stdout(predicate::str::contains("cp acq1/beh/events.tsv ./sourcedata/"))
        .stdout(predicate::str::contains("converter set to ignore"));

    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("hirni-tmp-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn spec2bids_refuses_invalid_specifications() {
    let tmp = TempDir::new().unwrap();
    let broken = EVENTS_SNIPPET.replace(r#""dataset_id": "ds-1", "#, "");
    write_spec(tmp.path(), &[DICOM_SNIPPET, &broken]);

    hirni(tmp.path())
        .args(["spec2bids", "--dry-run", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("snippet missing key 'dataset_id'"))
        .stdout(predicate::str::contains("--skip-invalid"))
        .stdout(predicate::str::contains("heudiconv").not());

    hirni(tmp.path())
        .args(["spec2bids", "--dry-run", "--skip-invalid", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("heudiconv -f hirni -s 02"))
        .stdout(predicate::str::contains("invalid snippet skipped"));
}

#[test]
fn spec2bids_runs_converters_and_reports_failures() {
    let tmp = TempDir::new().unwrap();
    let ok = EVENTS_SNIPPET.replace(
        "cp {location} {target_dir}/sourcedata/",
        "touch converted-{bids_subject}",
    );
    let failing = EVENTS_SNIPPET
        .replace("beh/events.tsv", "beh/broken.tsv")
        .replace("cp {location} {target_dir}/sourcedata/", "exit 4");
    write_spec(tmp.path(), &[&ok, &failing]);

    hirni(tmp.path())
        .args(["spec2bids", "acq1/studyspec.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("spec2bids(ok): acq1/beh/events.tsv"))
        .stdout(predicate::str::contains(
            "spec2bids(error): acq1/beh/broken.tsv",
        ))
        .stdout(predicate::str::contains("exited with status 4"));
    assert!(tmp.path().join("converted-02").exists());
}

// ── show ──

#[test]
fn show_prints_record_cards() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET, EVENTS_SNIPPET]);

    hirni(tmp.path())
        .args(["show", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("=== dicomseries 1.2.3 ==="))
        .stdout(predicate::str::contains("=== generic_file beh/events.tsv ==="))
        .stdout(predicate::str::contains("02  [approved]"))
        .stdout(predicate::str::contains("show(ok): acq1/studyspec.json (2 record(s))"));
}

#[test]
fn configuration_changes_the_batch_heuristic() {
    let tmp = TempDir::new().unwrap();
    write_spec(tmp.path(), &[DICOM_SNIPPET]);
    fs::create_dir_all(tmp.path().join(".hirni")).unwrap();
    fs::write(
        tmp.path().join(".hirni/config.toml"),
        "[conversion]\nheuristic = \"reproin\"\ncontainer = \"\"\n",
    )
    .unwrap();

    hirni(tmp.path())
        .args(["spec2bids", "-n", "acq1/studyspec.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("spec2bids(ok): acq1/studyspec.json (sub-02, 1 series) (heudiconv -f reproin"));
}
