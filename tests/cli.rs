//! CLI entry points over documents written to temporary files.

use std::io::Write;

use insta::assert_snapshot;
use tempfile::NamedTempFile;
use vnc::{Format, VncError};

fn write_document(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".json").expect("Failed to create temp file");
    file.write_all(text.as_bytes())
        .expect("Failed to write document");
    file
}

const STORY: &str = r#"{
  "file_path": ["story.odt"],
  "type": [{"name": "core.int"}],
  "body": {
    "type": "core.module",
    "name": "story",
    "loc": {"file_path": 0, "value": {"page": 1, "row": 0, "column": 0}},
    "region": [{"name": "body", "kind": "symbol_table", "block": [{"body": [
      {
        "type": "vn.scene",
        "name": "intro",
        "attr": {"title": "Intro"},
        "region": [{"name": "body", "kind": "plain", "block": [{"body": [
          {"type": "vn.const", "attr": {"value": 3}, "result": [{"name": "value", "vty": 0, "vid": 0}]},
          {"type": "vn.say", "operand": [
            {"name": "text", "kind": "single", "value": ["Hello"]},
            {"name": "count", "kind": "variadic", "value": [{"kind": "ref", "ref": 0}, 4]}
          ]}
        ]}]}]
      }
    ]}]}]
  }
}"#;

#[test]
fn test_print_text() {
    let file = write_document(STORY);
    let out = vnc::print(file.path(), Format::Text).unwrap();
    assert_snapshot!(out, @r#"
    core.module @story body {
        vn.scene @intro {title = "Intro"} body {
            %0 = vn.const {value = 3} : core.int
            vn.say(text: "Hello", count: [%0, 4])
        }
    }
    "#);
}

#[test]
fn test_print_json_round_trips() {
    let file = write_document(STORY);
    let json = vnc::print(file.path(), Format::Json).unwrap();
    let again = write_document(&json);
    assert_eq!(vnc::print(again.path(), Format::Json).unwrap(), json);
    assert_eq!(
        vnc::print(again.path(), Format::Text).unwrap(),
        vnc::print(file.path(), Format::Text).unwrap()
    );
}

#[test]
fn test_verify_counts_operations() {
    let file = write_document(STORY);
    let summary = vnc::verify(file.path()).unwrap();
    assert_eq!(summary.ops, 4);
    assert_eq!(summary.to_string(), "ok: core.module (4 operations)");
}

#[test]
fn test_verify_reports_arity_violations() {
    let file = write_document(
        r#"{"body": {"type": "vn.say", "operand": [{"name": "text", "kind": "single", "value": []}]}}"#,
    );
    let err = vnc::verify(file.path()).unwrap_err();
    let VncError::Invalid { result } = &err else {
        panic!("expected a validation failure, got {err}");
    };
    assert_eq!(result.errors.len(), 1);
    assert!(err.to_string().starts_with("IR verification failed:"));
}

#[test]
fn test_missing_file_and_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let err = vnc::print(&missing, Format::Text).unwrap_err();
    assert!(matches!(err, VncError::Io { .. }), "{err}");
    assert!(err.to_string().starts_with("cannot read"));

    let file = write_document("[1, 2");
    let err = vnc::verify(file.path()).unwrap_err();
    assert!(matches!(err, VncError::Json(vnir::JsonError::Syntax(_))), "{err}");
}
