//! CLI tests for source format handling: parse failures, partial progress
//! across a directory, and explicit content-type overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn lrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("lrag");
    path
}

fn setup_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("files")).unwrap();

    let config_path = root.join("lrag.toml");
    let config_content = format!(
        r#"[storage]
backend = "sqlite"
path = "{}"

[chunking]
max_chars = 400
overlap_chars = 40

[embedding]
provider = "hashed"
model = "hashed-test"
dims = 16
batch_size = 8
max_retries = 1
backoff_ms = 1

[retrieval]
mode = "keyword"
candidate_k = 50
top_k = 8

[generation]
provider = "echo"
model = "echo-test"
"#,
        root.join("data").join("lrag.sqlite").display()
    );
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lrag(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(lrag_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run lrag binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_invalid_pdf_fails_with_parse_error() {
    let (tmp, config) = setup_env();
    let bad = tmp.path().join("files").join("bad.pdf");
    fs::write(&bad, b"not a valid pdf").unwrap();
    run_lrag(&config, &["init"]);

    let (_, stderr, success) = run_lrag(&config, &["ingest", bad.to_str().unwrap()]);
    assert!(!success, "corrupt PDF was accepted");
    assert!(stderr.contains("failed to load"), "unexpected stderr: {stderr}");
    assert!(stderr.contains("bad.pdf"), "source not named: {stderr}");
    assert!(
        stderr.contains("failed to ingest"),
        "missing failure summary: {stderr}"
    );
}

#[test]
fn test_parse_failure_does_not_block_other_sources() {
    let (tmp, config) = setup_env();
    let files = tmp.path().join("files");
    fs::write(files.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(
        files.join("good.md"),
        "# Good\n\nIngestion keeps going after a parse failure.\n",
    )
    .unwrap();
    run_lrag(&config, &["init"]);

    let (stdout, stderr, success) = run_lrag(&config, &["ingest", files.to_str().unwrap()]);
    // The command reports failure, but the healthy source was still ingested.
    assert!(!success, "ingest with a corrupt source reported success");
    assert!(stdout.contains("good.md"), "good source not ingested: {stdout}");
    assert!(stdout.contains("chunks written:"), "no chunks written: {stdout}");
    assert!(stderr.contains("bad.pdf"), "failure not attributed: {stderr}");

    let (stdout, _, success) = run_lrag(&config, &["search", "parse failure"]);
    assert!(success, "search failed after partial ingest");
    assert!(stdout.contains("excerpt:"), "ingested content not found: {stdout}");

    let (stdout, _, _) = run_lrag(&config, &["stats"]);
    assert!(stdout.contains("Documents:  1"), "unexpected stats: {stdout}");
}

#[test]
fn test_content_type_override_keeps_markdown_literal() {
    let (tmp, config) = setup_env();
    let notes = tmp.path().join("files").join("notes.md");
    fs::write(
        &notes,
        "Intro.\n\n![diagram](arch.png)\n\nOutro.\n",
    )
    .unwrap();
    run_lrag(&config, &["init"]);

    let (stdout, stderr, success) =
        run_lrag(&config, &["ingest", notes.to_str().unwrap(), "--type", "text"]);
    assert!(success, "ingest failed: {stderr}\n{stdout}");

    // Treated as plain text, the image reference is literal content, so no
    // image chunk exists.
    let (stdout, _, success) = run_lrag(&config, &["search", "diagram", "--modality", "image"]);
    assert!(success);
    assert!(stdout.contains("No results."), "unexpected output: {stdout}");

    let (stdout, _, success) = run_lrag(&config, &["search", "diagram", "--modality", "text"]);
    assert!(success);
    assert!(stdout.contains("![diagram]"), "literal text not indexed: {stdout}");

    let (stdout, _, _) = run_lrag(&config, &["stats"]);
    assert!(stdout.contains("image:    0"), "unexpected stats: {stdout}");
}

#[test]
fn test_unknown_content_type_rejected() {
    let (tmp, config) = setup_env();
    let notes = tmp.path().join("files").join("notes.md");
    fs::write(&notes, "Anything.\n").unwrap();
    run_lrag(&config, &["init"]);

    let (_, stderr, success) =
        run_lrag(&config, &["ingest", notes.to_str().unwrap(), "--type", "docx"]);
    assert!(!success, "invalid content type accepted");
    assert!(
        stderr.contains("Unknown content type"),
        "unexpected stderr: {stderr}"
    );
}
