//! CLI end-to-end tests over the compiled binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn hapiq() -> Command {
    Command::cargo_bin("hapiq").expect("binary builds")
}

// ==================== extract ====================

#[test]
fn extract_emits_json_results() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "Data deposited under GSE123456 and https://doi.org/10.1038/s41467-021-23778-6."
    )
    .unwrap();

    hapiq()
        .args(["--quiet", "extract"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("GSE123456"))
        .stdout(predicate::str::contains("10.1038/s41467-021-23778-6"))
        .stdout(predicate::str::contains("\"kind\": \"geo\""));
}

#[test]
fn extract_missing_file_fails() {
    hapiq()
        .args(["--quiet", "extract", "/no/such/input.txt"])
        .assert()
        .code(1);
}

#[test]
fn extract_partial_failure_exits_two() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "GSE123456").unwrap();

    hapiq()
        .args(["--quiet", "extract"])
        .arg(file.path())
        .arg("/no/such/other.txt")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("GSE123456"));
}

#[test]
fn extract_writes_output_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "See 10.1234/example.dataset here.").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("results.json");

    hapiq()
        .args(["--quiet", "extract"])
        .arg(file.path())
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert!(json.as_array().unwrap().len() == 1);
}

// ==================== detect / validate ====================

#[test]
fn detect_recognizes_geo_accession() {
    hapiq()
        .args(["--quiet", "detect", "GSE123456"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("geo"));
}

#[test]
fn detect_unknown_identifier_fails() {
    hapiq()
        .args(["--quiet", "detect", "not/an/id"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("unknown"));
}

#[test]
fn validate_canonicalizes_accession() {
    hapiq()
        .args(["--quiet", "validate", "gse123456", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("GSE123456"));
}

#[test]
fn validate_invalid_identifier_fails() {
    hapiq()
        .args(["--quiet", "validate", "%%%%"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("invalid"));
}

// ==================== global flags ====================

#[test]
fn help_lists_subcommands() {
    hapiq()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn version_flag_prints_version() {
    hapiq()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
