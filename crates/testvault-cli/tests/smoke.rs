use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use testvault_store::schema::KEYWORD_TREE;
use testvault_store::{ArchiveStore, Record, SqliteArchiveStore};

const OUTPUT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<robot generator="Robot 6.1 (Python 3.11 on linux)" generated="20240105 10:00:00.000" rpa="false">
<suite id="s1" name="Smoke">
<test id="s1-t1" name="Greets">
<kw name="Log" library="BuiltIn">
<arguments>
<arg>hello</arg>
</arguments>
<msg timestamp="20240105 10:00:00.200" level="INFO">hello</msg>
<status status="PASS" starttime="20240105 10:00:00.150" endtime="20240105 10:00:00.250"/>
</kw>
<status status="PASS" starttime="20240105 10:00:00.100" endtime="20240105 10:00:00.300"/>
</test>
<status status="PASS" starttime="20240105 10:00:00.000" endtime="20240105 10:00:00.400"/>
</suite>
</robot>
"#;

fn write_report(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, OUTPUT_XML).expect("report write should succeed");
    path
}

fn testvault(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_testvault"))
        .args(args)
        .output()
        .expect("binary should run")
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("event line should be JSON"))
        .collect()
}

fn events_of_kind<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|event| event["kind"] == kind).collect()
}

#[test]
fn archive_with_event_json_expected_events_and_database() {
    let dir = TempDir::new().expect("temp dir");
    let report = write_report(dir.path(), "output.xml");
    let database = dir.path().join("archive.db");

    let output = testvault(&[
        "archive",
        report.to_str().expect("utf-8 path"),
        "--database",
        database.to_str().expect("utf-8 path"),
        "--event-json",
    ]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let events = json_lines(&output);
    let tests = events_of_kind(&events, "test_finished");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0]["full_name"], "Smoke.Greets");
    assert_eq!(tests[0]["status"], "PASS");
    assert_eq!(events_of_kind(&events, "suite_finished").len(), 1);
    assert_eq!(events_of_kind(&events, "run_finished").len(), 1);
    assert!(database.exists());
}

#[test]
fn archive_two_files_in_one_invocation_expected_same_build_number() {
    let dir = TempDir::new().expect("temp dir");
    let first = write_report(dir.path(), "first.xml");
    let second = write_report(dir.path(), "second.xml");
    let database = dir.path().join("archive.db");

    let output = testvault(&[
        "archive",
        first.to_str().expect("utf-8 path"),
        second.to_str().expect("utf-8 path"),
        "--database",
        database.to_str().expect("utf-8 path"),
        "--series",
        "nightly",
        "--event-json",
    ]);

    assert!(output.status.success());
    let events = json_lines(&output);
    let builds: Vec<(String, i64)> = events_of_kind(&events, "run_finished")
        .iter()
        .flat_map(|event| event["builds"].as_array().cloned().unwrap_or_default())
        .map(|build| {
            (
                build["name"].as_str().unwrap_or_default().to_string(),
                build["build_number"].as_i64().unwrap_or_default(),
            )
        })
        .collect();
    assert_eq!(
        builds,
        vec![
            ("nightly".to_string(), 1),
            ("All builds".to_string(), 1),
            ("nightly".to_string(), 1),
            ("All builds".to_string(), 1),
        ]
    );
}

#[test]
fn keyword_tree_after_archive_expected_json_call_tree() {
    let dir = TempDir::new().expect("temp dir");
    let report = write_report(dir.path(), "output.xml");
    let database = dir.path().join("archive.db");
    let archived = testvault(&[
        "archive",
        report.to_str().expect("utf-8 path"),
        "--database",
        database.to_str().expect("utf-8 path"),
    ]);
    assert!(archived.status.success());

    let fingerprint = {
        let store = SqliteArchiveStore::open(&database).expect("open database");
        store
            .fetch_one_value(
                KEYWORD_TREE,
                "fingerprint",
                &Record::new().with("keyword", "Log"),
            )
            .expect("query")
            .and_then(|value| value.as_str().map(str::to_string))
            .expect("keyword fingerprint")
    };

    let output = testvault(&[
        "keyword-tree",
        "--database",
        database.to_str().expect("utf-8 path"),
        "--fingerprint",
        &fingerprint,
    ]);

    assert!(output.status.success());
    let tree: Value = serde_json::from_slice(&output.stdout).expect("tree JSON");
    assert_eq!(tree["kind"], "call");
    assert_eq!(tree["keyword"], "Log");
    assert_eq!(tree["library"], "BuiltIn");
    assert_eq!(tree["arguments"], serde_json::json!(["hello"]));
    assert_eq!(tree["fingerprint"], fingerprint.as_str());
}

#[test]
fn archive_missing_file_expected_exit_one_and_no_database() {
    let dir = TempDir::new().expect("temp dir");
    let database = dir.path().join("archive.db");

    let output = testvault(&[
        "archive",
        dir.path().join("missing.xml").to_str().expect("utf-8 path"),
        "--database",
        database.to_str().expect("utf-8 path"),
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not find input file"));
    assert!(!database.exists());
}

#[test]
fn archive_unsupported_format_expected_exit_one() {
    let dir = TempDir::new().expect("temp dir");
    let report = write_report(dir.path(), "output.xml");

    let output = testvault(&[
        "archive",
        report.to_str().expect("utf-8 path"),
        "--format",
        "nunit",
        "--dbengine",
        "memory",
    ]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported report format"));
}
