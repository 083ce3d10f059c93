//! End-to-end tests that drive the compiled `lrag` binary against a
//! temporary database, using the offline hashed embedder and the echo
//! generation backend so no network is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn lrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lrag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Seed source files
    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("alpha.md"),
        "# Building with Cargo\n\nRust projects are built with cargo. Run `cargo build` to \
         compile and `cargo test` to run the test suite. The Cargo.toml manifest lists \
         dependencies.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("beta.md"),
        "# Training Notes\n\nThe Python scripts load the dataset, fit a gradient boosting \
         model, and log validation metrics after every epoch.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("gamma.txt"),
        "Deployment runbook. The service ships as a container and rolls out to the Kubernetes \
         cluster with a blue-green strategy. Rollback takes one command.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("delta.md"),
        "# Architecture\n\nThe overview below shows how the pieces connect.\n\n\
         ![diagram of the ingestion flow](arch.png)\n\nEach stage hands records to the next.\n",
    )
    .unwrap();

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
mode = "hybrid"
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

fn docs_dir(config: &Path) -> String {
    config
        .parent()
        .unwrap()
        .join("docs")
        .to_string_lossy()
        .to_string()
}

fn ingest_docs(config: &Path) {
    let docs = docs_dir(config);
    let (stdout, stderr, success) = run_lrag(config, &["ingest", &docs]);
    assert!(success, "ingest failed: {stderr}\n{stdout}");
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_lrag(&config, &["init"]);
    assert!(success, "init failed: {stderr}");
    assert!(stdout.contains("initialized"), "unexpected output: {stdout}");
    assert!(tmp.path().join("data").join("lrag.sqlite").exists());
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_lrag(&config, &["init"]);
    assert!(success, "first init failed: {stderr}");
    let (stdout, stderr, success) = run_lrag(&config, &["init"]);
    assert!(success, "second init failed: {stderr}");
    assert!(stdout.contains("initialized"), "unexpected output: {stdout}");
}

#[test]
fn test_ingest_directory() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);

    let docs = docs_dir(&config);
    let (stdout, stderr, success) = run_lrag(&config, &["ingest", &docs]);
    assert!(success, "ingest failed: {stderr}\n{stdout}");
    for name in ["alpha.md", "beta.md", "gamma.txt", "delta.md"] {
        assert!(stdout.contains(name), "missing {name} in: {stdout}");
    }
    assert!(stdout.contains("chunks written:"), "no chunk counts: {stdout}");
    assert!(stdout.trim_end().ends_with("ok"), "unexpected output: {stdout}");
}

#[test]
fn test_reingest_unchanged_is_skipped() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let docs = docs_dir(&config);
    let (stdout, stderr, success) = run_lrag(&config, &["ingest", &docs]);
    assert!(success, "second ingest failed: {stderr}");
    assert!(stdout.contains("(unchanged)"), "unexpected output: {stdout}");
    assert!(
        !stdout.contains("chunks written:"),
        "unchanged ingest wrote chunks: {stdout}"
    );
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();

    let docs = docs_dir(&config);
    let (stdout, stderr, success) = run_lrag(&config, &["ingest", &docs, "--dry-run"]);
    assert!(success, "dry-run failed: {stderr}");
    assert!(stdout.contains("sources found: 4"), "unexpected output: {stdout}");
    assert!(stdout.contains("estimated chunks:"), "unexpected output: {stdout}");
    assert!(
        !tmp.path().join("data").join("lrag.sqlite").exists(),
        "dry-run created the database"
    );
}

#[test]
fn test_keyword_search_finds_content() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) = run_lrag(&config, &["search", "cargo", "--mode", "keyword"]);
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("excerpt:"), "no results printed: {stdout}");
    assert!(stdout.contains("cargo"), "query term not in excerpt: {stdout}");
}

#[test]
fn test_hybrid_search_is_deterministic() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (first, _, success) = run_lrag(&config, &["search", "records", "--mode", "hybrid"]);
    assert!(success, "first search failed");
    let (second, _, success) = run_lrag(&config, &["search", "records", "--mode", "hybrid"]);
    assert!(success, "second search failed");
    assert_eq!(first, second, "same query returned different rankings");
}

#[test]
fn test_search_empty_query_no_results() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) = run_lrag(&config, &["search", "", "--mode", "keyword"]);
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("No results."), "unexpected output: {stdout}");
}

#[test]
fn test_search_unmatched_query_no_results() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) =
        run_lrag(&config, &["search", "xyznonexistent", "--mode", "keyword"]);
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("No results."), "unexpected output: {stdout}");
}

#[test]
fn test_search_json_output() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) =
        run_lrag(&config, &["search", "cargo", "--mode", "keyword", "--json"]);
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("chunk_id"), "unexpected output: {stdout}");
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("search --json did not print valid JSON");
    assert!(!parsed.as_array().unwrap().is_empty());
}

#[test]
fn test_unknown_search_mode_rejected() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);

    let (_, stderr, success) = run_lrag(&config, &["search", "cargo", "--mode", "fuzzy"]);
    assert!(!success, "invalid mode accepted");
    assert!(stderr.contains("Unknown search mode"), "unexpected stderr: {stderr}");
}

#[test]
fn test_document_filter_excludes_everything_else() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) = run_lrag(
        &config,
        &["search", "cargo", "--mode", "keyword", "--doc", "no-such-document"],
    );
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("No results."), "unexpected output: {stdout}");
}

#[test]
fn test_image_modality_filter() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    // The only place "diagram" appears is the Markdown image caption.
    let (stdout, stderr, success) = run_lrag(
        &config,
        &["search", "diagram", "--mode", "keyword", "--modality", "image"],
    );
    assert!(success, "search failed: {stderr}");
    assert!(stdout.contains("(image)"), "unexpected output: {stdout}");
    assert!(
        stdout.contains("diagram of the ingestion flow"),
        "caption not in excerpt: {stdout}"
    );

    let (stdout, _, success) = run_lrag(
        &config,
        &["search", "diagram", "--mode", "keyword", "--modality", "text"],
    );
    assert!(success);
    assert!(stdout.contains("No results."), "unexpected output: {stdout}");
}

#[test]
fn test_ask_prints_citations_and_model() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) = run_lrag(
        &config,
        &["ask", "How are Rust projects built with cargo?", "--mode", "keyword"],
    );
    assert!(success, "ask failed: {stderr}");
    // The echo backend returns the prompt, so chunk headers are visible.
    assert!(stdout.contains("(chunk "), "prompt not echoed: {stdout}");
    assert!(stdout.contains("citations:"), "no citations section: {stdout}");
    assert!(stdout.contains("model: echo-test"), "unexpected output: {stdout}");
}

#[test]
fn test_ask_empty_store_gives_fixed_answer() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);

    let (stdout, stderr, success) = run_lrag(&config, &["ask", "anything indexed?"]);
    assert!(success, "ask failed: {stderr}");
    assert!(
        stdout.contains("No relevant information found"),
        "unexpected output: {stdout}"
    );
    assert!(stdout.contains("citations: none"), "unexpected output: {stdout}");
}

#[test]
fn test_stats_reports_counts() {
    let (_tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);
    ingest_docs(&config);

    let (stdout, stderr, success) = run_lrag(&config, &["stats"]);
    assert!(success, "stats failed: {stderr}");
    assert!(stdout.contains("localrag database stats"), "unexpected output: {stdout}");
    assert!(stdout.contains("Documents:  4"), "unexpected output: {stdout}");
    assert!(stdout.contains("image:    1"), "unexpected output: {stdout}");
}

#[tokio::test]
async fn test_server_endpoints() {
    let (tmp, config) = setup_test_env();
    run_lrag(&config, &["init"]);

    // Give this test its own port so it never races another instance.
    let bind = "127.0.0.1:17943";
    let mut content = fs::read_to_string(&config).unwrap();
    content.push_str(&format!("\n[server]\nbind = \"{bind}\"\n"));
    fs::write(&config, content).unwrap();

    let mut child = Command::new(lrag_binary())
        .arg("--config")
        .arg(&config)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn lrag serve");

    let result = exercise_server(bind, tmp.path()).await;
    child.kill().ok();
    child.wait().ok();
    if let Err(e) = result {
        panic!("server checks failed: {e}");
    }
}

async fn exercise_server(bind: &str, root: &Path) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let base = format!("http://{bind}");

    // Wait for the server to come up.
    let mut healthy = false;
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{base}/health")).send().await {
            if resp.status().is_success() {
                let body: serde_json::Value = resp.json().await?;
                anyhow::ensure!(body["status"] == "ok", "unexpected health body: {body}");
                healthy = true;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    anyhow::ensure!(healthy, "server never became healthy");

    // Ingest one seeded file over HTTP.
    let source = root.join("docs").join("alpha.md");
    let resp = client
        .post(format!("{base}/ingest"))
        .json(&serde_json::json!({ "source": source.to_string_lossy() }))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "ingest failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await?;
    anyhow::ensure!(
        body["embedded"].as_u64().unwrap_or(0) > 0,
        "no chunks embedded: {body}"
    );

    // Query it back.
    let resp = client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "question": "cargo build", "mode": "keyword" }))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "query failed: {}", resp.status());
    let body: serde_json::Value = resp.json().await?;
    anyhow::ensure!(
        !body["results"].as_array().map(Vec::is_empty).unwrap_or(true),
        "no results: {body}"
    );
    anyhow::ensure!(
        !body["citations"].as_array().map(Vec::is_empty).unwrap_or(true),
        "no citations: {body}"
    );

    // Validation errors carry the structured error body.
    let resp = client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "question": "" }))
        .send()
        .await?;
    anyhow::ensure!(resp.status() == 400, "expected 400, got {}", resp.status());
    let body: serde_json::Value = resp.json().await?;
    anyhow::ensure!(
        body["error"]["code"] == "bad_request",
        "unexpected error body: {body}"
    );

    Ok(())
}
