#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const CONFIG: &str = r#"
default_profile = "dev"

[profiles.dev]
host = "localhost"
port = 10000

[[entities]]
name = "Title"
table = "titles"
columns = [
  { member = "Name", column = "name", type = "string" },
  { member = "Year", column = "year", type = "int" },
]
"#;

const ORDERED_QUERY: &str = r#"{
    "op": "order_by",
    "source": {
        "op": "where",
        "source": { "op": "table", "entity": "Title", "var": "t" },
        "predicate": {
            "kind": "binary",
            "op": "gt",
            "left": { "kind": "member", "var": "t", "path": ["Year"] },
            "right": { "kind": "param", "name": "since", "value": { "t": "Int", "v": 1990 } }
        }
    },
    "keys": [{ "expr": { "kind": "member", "var": "t", "path": ["Name"] } }]
}"#;

fn setup() -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("config.toml");
    fs::write(&config, CONFIG).expect("write config");
    let query = dir.path().join("query.json");
    fs::write(&query, ORDERED_QUERY).expect("write query");
    (dir, config, query)
}

fn hiveq(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hiveq");
    cmd.env_remove("HIVEQ_PROFILE_NAME")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config);
    cmd
}

fn stdout_of(cmd: &mut assert_cmd::Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn translate_prints_hiveql_and_parameters() {
    let (_dir, config, query) = setup();
    let stdout = stdout_of(hiveq(&config).arg("translate").arg("--query").arg(&query));
    assert!(
        stdout.starts_with(
            "SELECT t0.name, t0.year FROM titles t0 WHERE (t0.year > ${hivevar:since}) ORDER BY"
        ),
        "{stdout}"
    );
    assert!(stdout.contains("-- ${hivevar:since} = 1990 (BIGINT)"), "{stdout}");
}

#[test]
fn translate_explain_prints_every_stage() {
    let (_dir, config, query) = setup();
    let stdout = stdout_of(
        hiveq(&config)
            .arg("translate")
            .arg("--query")
            .arg(&query)
            .arg("--explain"),
    );
    for stage in ["-- bind", "-- order_by", "-- skip_take", "-- unused_columns", "-- hive"] {
        assert!(stdout.contains(stage), "missing {stage} in {stdout}");
    }
}

#[test]
fn translate_json_is_machine_readable() {
    let (_dir, config, query) = setup();
    let stdout = stdout_of(
        hiveq(&config)
            .arg("--format")
            .arg("json")
            .arg("translate")
            .arg("--query")
            .arg(&query),
    );
    let doc: Value = serde_json::from_str(&stdout).expect("json output");
    assert!(doc["text"]
        .as_str()
        .expect("text")
        .contains("FROM titles t0"));
    assert_eq!(doc["parameters"][0]["name"], "since");
    assert_eq!(doc["parameters"][0]["value"], 1990);
    assert_eq!(doc["shape_hash"].as_str().map(str::len), Some(16));
}

#[test]
fn entities_lists_configured_mappings() {
    let (_dir, config, _query) = setup();
    let stdout = stdout_of(hiveq(&config).arg("entities"));
    assert!(stdout.contains("Title -> titles"), "{stdout}");

    let stdout = stdout_of(hiveq(&config).arg("--format").arg("json").arg("entities"));
    let doc: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(doc[0]["name"], "Title");
    assert_eq!(doc[0]["columns"].as_array().map(Vec::len), Some(2));
}

#[test]
fn transform_prints_the_streaming_command() {
    let (_dir, config, _query) = setup();
    let stdout = stdout_of(
        hiveq(&config)
            .arg("transform")
            .args(["--driver", "/opt/jobs/driver"])
            .args(["--target", "/opt/jobs/wordcount"])
            .args(["--type", "WordCount"])
            .args(["--method", "Map"])
            .args(["--input", "kv_input"]),
    );
    assert!(stdout.starts_with("add file /opt/jobs/driver;"), "{stdout}");
    assert!(stdout.contains("USING 'driver wordcount WordCount TWFw'"), "{stdout}");
    assert!(stdout.trim_end().ends_with("USING 'cat'"), "{stdout}");
}

#[test]
fn malformed_query_files_fail() {
    let (dir, config, _query) = setup();
    let broken = dir.path().join("broken.json");
    fs::write(&broken, r#"{ "op": "teleport" }"#).expect("write");
    let output = hiveq(&config)
        .arg("translate")
        .arg("--query")
        .arg(&broken)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("failed to parse query"), "{stderr}");
}

#[test]
fn unknown_entities_report_their_code() {
    let (dir, config, _query) = setup();
    let query = dir.path().join("awards.json");
    fs::write(&query, r#"{ "op": "table", "entity": "Award", "var": "a" }"#).expect("write");
    let output = hiveq(&config)
        .arg("translate")
        .arg("--query")
        .arg(&query)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("UnknownEntity"), "{stderr}");
}

#[test]
fn unknown_profiles_are_rejected_before_connecting() {
    let (_dir, config, query) = setup();
    let output = hiveq(&config)
        .arg("--profile")
        .arg("prod")
        .arg("run")
        .arg("--query")
        .arg(&query)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("profile 'prod' not found"), "{stderr}");
}
