//! Tests for the `vingest` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

fn vingest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("vingest");
    path
}

fn run(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(vingest_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run vingest");
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        output.status.success(),
    )
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("vingest.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn models_lists_catalog_without_config() {
    let tmp = tempfile::tempdir().unwrap();
    let (stdout, _, ok) = run(&tmp.path().join("missing.toml"), &["models"]);
    assert!(ok);
    assert!(stdout.starts_with("MODEL"));
    assert!(stdout.contains("BAAI/bge-small-en-v1.5"));
    assert!(stdout.contains("384"));
}

#[test]
fn ingest_into_missing_collection_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let doc = tmp.path().join("a.txt");
    std::fs::write(&doc, "Some text that would be ingested if the collection existed.").unwrap();
    let config = write_config(
        tmp.path(),
        "[vector_store]\nprovider = \"memory\"\n",
    );

    let (stdout, stderr, ok) = run(
        &config,
        &["ingest", doc.to_str().unwrap(), "--collection", "kb"],
    );
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Collection 'kb' not found"), "{}", stderr);
}

#[test]
fn ingest_of_missing_path_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let missing = tmp.path().join("nope.txt");

    let (_, stderr, ok) = run(
        &config,
        &["ingest", missing.to_str().unwrap(), "--collection", "kb"],
    );
    assert!(!ok);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "[ingest]\nchunk_size = 100\noverlap = 100\n");

    let (_, stderr, ok) = run(&config, &["sync"]);
    assert!(!ok);
    assert!(stderr.contains("overlap"), "{}", stderr);
}

#[test]
fn sync_without_source_root_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("absent");
    let config = write_config(
        tmp.path(),
        &format!("[sync]\nsource_root = {:?}\n", root.to_str().unwrap()),
    );

    let (_, stderr, ok) = run(&config, &["sync"]);
    assert!(!ok);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}
