use clap::Parser;
use ingest_cli::{Args, read_tables};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_settings(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("settings.json");
    let settings = json!({
        "loader_version": 1,
        "target_url": "http://localhost:1080",
        "project_id": "SD_ME0WME0W",
        "entities": [{ "name": "participant", "endpoint": "participants" }],
        "key_composition": { "participant": { "required": [{ "field": "PARTICIPANT|ID" }] } }
    });
    std::fs::write(&path, settings.to_string()).unwrap();
    path
}

// ── Flags ────────────────────────────────────────────────────────

#[test]
fn defaults() {
    let args = Args::try_parse_from(["ingest-load", "settings.json", "tables.json"]).unwrap();
    let options = args.options();
    assert!(!options.use_async);
    assert!(!options.dry_run);
    assert_eq!(options.workers, 16);
    assert_eq!(options.resume_from, None);
    assert_eq!(options.cache_dir, PathBuf::from("."));
    assert_eq!(args.default_log_filter(), "info");
}

#[test]
fn flags_map_onto_options() {
    let args = Args::try_parse_from([
        "ingest-load",
        "settings.json",
        "tables.json",
        "--use-async",
        "--workers",
        "4",
        "--resume-from",
        "BS_5",
        "--clear-cache",
        "--cache-dir",
        "/tmp/cache",
        "-v",
    ])
    .unwrap();
    let options = args.options();
    assert!(options.use_async);
    assert_eq!(options.workers, 4);
    assert_eq!(options.resume_from.as_deref(), Some("BS_5"));
    assert!(options.clear_cache);
    assert_eq!(options.cache_dir, PathBuf::from("/tmp/cache"));
    assert_eq!(args.default_log_filter(), "debug");
}

#[test]
fn tables_argument_is_required() {
    assert!(Args::try_parse_from(["ingest-load", "settings.json"]).is_err());
}

// ── Settings and tables ──────────────────────────────────────────

#[test]
fn overrides_replace_file_values() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(&dir);
    let args = Args::try_parse_from([
        "ingest-load",
        settings.to_str().unwrap(),
        "tables.json",
        "--target-url",
        "http://other:8080",
        "--project-id",
        "SD_OTHER",
    ])
    .unwrap();

    let settings = args.settings().unwrap();
    assert_eq!(settings.target_url, "http://other:8080");
    assert_eq!(settings.project_id, "SD_OTHER");
}

#[test]
fn blank_override_is_rejected() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(&dir);
    let args = Args::try_parse_from([
        "ingest-load",
        settings.to_str().unwrap(),
        "tables.json",
        "--project-id",
        " ",
    ])
    .unwrap();
    assert!(args.settings().is_err());
}

#[test]
fn reads_tables_by_name() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tables.json");
    let tables = json!({
        "participant": [{ "PARTICIPANT|ID": "P1" }, { "PARTICIPANT|ID": "P2" }],
        "default": []
    });
    std::fs::write(&path, tables.to_string()).unwrap();

    let tables = read_tables(&path).unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables["participant"][1].get_str("PARTICIPANT|ID").as_deref(), Some("P2"));
}

#[test]
fn malformed_tables_are_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tables.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();
    assert!(read_tables(&path).is_err());
}
