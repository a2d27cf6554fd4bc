use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, content).expect("write file");
    path
}

const ORDERS_MAPPING: &str = r#"
columns:
  order: { path: id }
  sku: { rel_path: sku }
  qty: { rel_path: qty, cast: int, default: 0 }
explode:
  path: items
"#;

const ORDERS_INPUT: &str = r#"[
  {"id": "o-1", "items": [{"sku": "a", "qty": "2"}, {"sku": "b"}]},
  {"id": "o-2", "items": []}
]"#;

#[test]
fn convert_writes_csv_to_stdout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", ORDERS_MAPPING);
    let input = write_file(dir, "input.json", ORDERS_INPUT);

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("convert").arg("-m").arg(mapping).arg("-i").arg(input);

    cmd.assert()
        .success()
        .stdout("order,sku,qty\no-1,a,2\no-1,b,0\no-2,,0\n");
}

#[test]
fn convert_writes_json_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", ORDERS_MAPPING);
    let input = write_file(dir, "input.json", ORDERS_INPUT);
    let output = dir.join("out.json");

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("convert")
        .arg("-m")
        .arg(mapping)
        .arg("-i")
        .arg(input)
        .arg("-o")
        .arg(&output)
        .arg("--format")
        .arg("json");
    cmd.assert().success();

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).expect("read output")).expect("json");
    assert_eq!(
        written,
        serde_json::json!([
            {"order": "o-1", "sku": "a", "qty": 2},
            {"order": "o-1", "sku": "b", "qty": 0},
            {"order": "o-2", "sku": null, "qty": 0}
        ])
    );
}

#[test]
fn convert_streams_ndjson_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", ORDERS_MAPPING);
    let input = write_file(
        dir,
        "input.ndjson",
        "{\"id\": \"o-1\", \"items\": [{\"sku\": \"a\"}]}\n\n{\"id\": \"o-2\", \"items\": [{\"sku\": \"b\", \"qty\": 5}]}\n",
    );

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("convert")
        .arg("-m")
        .arg(mapping)
        .arg("-i")
        .arg(input)
        .arg("--batch-size")
        .arg("1")
        .arg("--no-header");

    cmd.assert().success().stdout("o-1,a,0\no-2,b,5\n");
}

#[test]
fn convert_reports_bad_ndjson_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", ORDERS_MAPPING);
    let input = write_file(dir, "input.jsonl", "{\"id\": 1}\n{broken\n");

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("convert").arg("-m").arg(mapping).arg("-i").arg(input);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn on_error_flag_sets_engine_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(
        dir,
        "mapping.yaml",
        "columns:\n  sorted:\n    sort: { over: { path: xs }, key: { rel_path: k } }\n",
    );
    let input = write_file(dir, "input.json", r#"{"xs": [{"k": 1}, {"k": "a"}]}"#);

    let mut lenient = cargo_bin_cmd!("tabmorph");
    lenient
        .arg("convert")
        .arg("-m")
        .arg(&mapping)
        .arg("-i")
        .arg(&input);
    lenient.assert().success().stdout("sorted\n\"\"\n");

    let mut strict = cargo_bin_cmd!("tabmorph");
    strict
        .arg("convert")
        .arg("-m")
        .arg(&mapping)
        .arg("-i")
        .arg(&input)
        .arg("--on-error")
        .arg("raise");
    strict
        .assert()
        .failure()
        .stderr(predicate::str::contains("columns.sorted"));
}

#[test]
fn config_file_and_strict_schema() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(
        dir,
        "mapping.yaml",
        r#"
columns:
  age: { path: age }
schema:
  columns:
    age: { type: int, min: 0 }
"#,
    );
    let input = write_file(dir, "input.json", r#"[{"age": 3}, {"age": -4}]"#);
    let config = write_file(dir, "engine.yaml", "strict_schema: true\n");

    let mut lenient = cargo_bin_cmd!("tabmorph");
    lenient
        .arg("convert")
        .arg("-m")
        .arg(&mapping)
        .arg("-i")
        .arg(&input);
    lenient.assert().success().stdout("age\n3\n-4\n");

    let mut strict = cargo_bin_cmd!("tabmorph");
    strict
        .arg("convert")
        .arg("-m")
        .arg(&mapping)
        .arg("-i")
        .arg(&input)
        .arg("--config")
        .arg(&config);
    strict
        .assert()
        .failure()
        .stderr(predicate::str::contains("min-violation"));
}

#[test]
fn convert_rejects_invalid_mapping() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", "columns:\n  a: { math: [pow, 1, 2] }\n");
    let input = write_file(dir, "input.json", "{}");

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("convert").arg("-m").arg(mapping).arg("-i").arg(input);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("columns.a.math[0]"));
}

#[test]
fn validate_lists_errors_and_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(
        dir,
        "mapping.yaml",
        "columns:\n  a: { path: x, cast: decimal }\n  b: { ref: nowhere }\n",
    );

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("validate").arg("-m").arg(&mapping).arg("--warnings");

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("error: [InvalidCast] columns.a.cast"))
        .stdout(predicate::str::contains("warning: [UndefinedRef] columns.b.ref"));
}

#[test]
fn validate_accepts_good_mapping() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(dir, "mapping.yaml", ORDERS_MAPPING);

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("validate").arg("-m").arg(mapping);

    cmd.assert().success().stdout("ok\n");
}

#[test]
fn trace_prints_json_per_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let mapping = write_file(
        dir,
        "mapping.json",
        r#"{"columns": {"greeting": {"concat": ["hi ", {"path": "name"}]}}}"#,
    );
    let input = write_file(dir, "record.json", r#"{"name": "Ada"}"#);

    let mut cmd = cargo_bin_cmd!("tabmorph");
    cmd.arg("trace").arg("-m").arg(mapping).arg("-i").arg(input);

    let output = cmd.assert().success().get_output().stdout.clone();
    let trace: serde_json::Value = serde_json::from_slice(&output).expect("trace json");
    assert_eq!(trace["rows_emitted"], serde_json::json!(1));
    assert_eq!(trace["rows"][0]["row"]["greeting"], serde_json::json!("hi Ada"));
    assert_eq!(
        trace["rows"][0]["columns"]["greeting"]["op"],
        serde_json::json!("concat")
    );
}
