use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn gno_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("gno");
    path
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    config_path: PathBuf,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let notes_dir = root.join("notes");
    fs::create_dir_all(&notes_dir).unwrap();

    fs::write(
        notes_dir.join("alpha.md"),
        "# Alpha Document\n\n\
         This note is about Rust programming, cargo, and crates. \
         See [[Beta Document]] for the machine-learning side of things.\n\n\
         ```text\n[[Not A Real Link]]\n```\n",
    )
    .unwrap();
    fs::write(
        notes_dir.join("beta.md"),
        "# Beta Document\n\n\
         This document discusses Python, PyTorch, and deep learning frameworks.\n",
    )
    .unwrap();
    fs::write(
        notes_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nNotes about deployment, Kubernetes, and Docker.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"version = "1.0"

[db]
data_dir = "{data_dir}"
index_name = "test"

[fts_tokenizer]

[chunking]
max_tokens = 700
overlap_tokens = 0

[retrieval]
final_limit = 12

[embedding]
provider = "disabled"

[server]
bind = "127.0.0.1:0"

[[collections]]
name = "notes"
path = "{notes_dir}"
pattern = "**/*"
"#,
        data_dir = root.join("data").display(),
        notes_dir = notes_dir.display(),
    );

    let config_path = root.join("config").join("gno.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv { _tmp: tmp, root, config_path }
}

fn run_gno(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = gno_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run gno binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_gno_json(config_path: &Path, args: &[&str]) -> (serde_json::Value, bool) {
    let mut full_args = vec!["--json"];
    full_args.extend_from_slice(args);
    let (stdout, stderr, success) = run_gno(config_path, &full_args);
    let value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("expected JSON stdout, got error {e}\nstdout={stdout}\nstderr={stderr}"));
    (value, success)
}

#[test]
fn update_ingests_every_file_in_the_collection() {
    let env = setup_test_env();

    let (value, success) = run_gno_json(&env.config_path, &["update"]);
    assert!(success, "update failed: {value}");
    assert_eq!(value["files_seen"], 3);
    assert_eq!(value["files_added"], 3);
    assert_eq!(value["files_errored"], 0);
}

#[test]
fn resync_without_changes_is_idempotent() {
    let env = setup_test_env();

    run_gno(&env.config_path, &["update"]);
    let (value, success) = run_gno_json(&env.config_path, &["update"]);
    assert!(success);
    assert_eq!(value["files_added"], 0);
    assert_eq!(value["files_unchanged"], 3);
}

#[test]
fn modifying_a_file_triggers_a_single_reingest() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    std::thread::sleep(std::time::Duration::from_secs(1));
    fs::write(
        env.root.join("notes").join("alpha.md"),
        "# Alpha Document Revised\n\nCompletely rewritten content about Rust.\n",
    )
    .unwrap();

    let (value, success) = run_gno_json(&env.config_path, &["update"]);
    assert!(success);
    assert_eq!(value["files_added"], 0);
    assert_eq!(value["files_updated"], 1);
    assert_eq!(value["files_unchanged"], 2);
}

#[test]
fn lexical_search_finds_matching_document() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let (value, success) = run_gno_json(&env.config_path, &["search", "Rust programming"]);
    assert!(success);
    let titles: Vec<String> = value["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(titles.iter().any(|t| t.contains("Alpha")), "expected alpha in {titles:?}");
}

#[test]
fn search_is_deterministic_across_runs() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let (first, _) = run_gno_json(&env.config_path, &["search", "document"]);
    let (second, _) = run_gno_json(&env.config_path, &["search", "document"]);
    assert_eq!(first, second);
}

#[test]
fn search_with_no_hits_returns_empty_results() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let (value, success) = run_gno_json(&env.config_path, &["search", "xyznonexistentterm"]);
    assert!(success);
    assert!(value["results"].as_array().unwrap().is_empty());
}

fn docid_for_title(env: &TestEnv, needle: &str) -> String {
    let (value, _) = run_gno_json(&env.config_path, &["search", needle]);
    value["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["title"].as_str().unwrap_or_default().contains(needle))
        .unwrap_or_else(|| panic!("no search result titled like '{needle}': {value}"))
        ["docid"]
        .as_str()
        .unwrap()
        .to_string()
}

#[test]
fn wiki_link_is_extracted_and_resolves_a_backlink() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let alpha_id = docid_for_title(&env, "Alpha");
    let beta_id = docid_for_title(&env, "Beta");

    let (alpha, _) = run_gno_json(&env.config_path, &["links", &alpha_id]);
    let targets: Vec<&str> = alpha.as_array().unwrap().iter().map(|l| l["target_ref"].as_str().unwrap()).collect();
    assert!(targets.iter().any(|t| t.contains("Beta")), "expected a link to Beta in {targets:?}");

    let (beta_backlinks, _) = run_gno_json(&env.config_path, &["backlinks", &beta_id]);
    let sources: Vec<&str> = beta_backlinks
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["source_uri"].as_str().unwrap())
        .collect();
    assert!(sources.iter().any(|s| s.contains("alpha")), "expected alpha as a backlink source in {sources:?}");
}

#[test]
fn link_inside_a_code_fence_is_not_extracted() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let alpha_id = docid_for_title(&env, "Alpha");
    let (links, _) = run_gno_json(&env.config_path, &["links", &alpha_id]);
    let targets: Vec<&str> = links.as_array().unwrap().iter().map(|l| l["target_ref"].as_str().unwrap()).collect();
    assert!(
        !targets.iter().any(|t| t.contains("Not A Real Link")),
        "link inside a fenced code block must not be extracted, got {targets:?}"
    );
}

#[test]
fn get_by_docid_round_trips_the_document_body() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let alpha_id = docid_for_title(&env, "Alpha");
    let (doc, success) = run_gno_json(&env.config_path, &["get", &alpha_id]);
    assert!(success);
    assert_eq!(doc["docid"], alpha_id);
    assert!(doc["body"].as_str().unwrap().contains("Rust programming"));
}

#[test]
fn get_unknown_docid_fails_with_not_found() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let (_, stderr, success) = run_gno(&env.config_path, &["get", "#deadbeef"]);
    assert!(!success);
    assert!(stderr.contains("NOT_FOUND"), "expected NOT_FOUND code, got: {stderr}");
}

#[test]
fn collection_add_rejects_a_duplicate_name() {
    let env = setup_test_env();
    let extra = env.root.join("extra");
    fs::create_dir_all(&extra).unwrap();

    let (_, _, first) = run_gno(
        &env.config_path,
        &["collection", "add", "notes", extra.to_str().unwrap()],
    );
    assert!(!first, "adding a collection whose name already exists should fail");
}

#[test]
fn collection_remove_then_add_round_trips() {
    let env = setup_test_env();

    let (_, _, removed) = run_gno(&env.config_path, &["collection", "remove", "notes"]);
    assert!(removed, "removing a registered collection should succeed");

    let (_, _, removed_again) = run_gno(&env.config_path, &["collection", "remove", "notes"]);
    assert!(!removed_again, "removing an already-removed collection should fail");
}

#[test]
fn reset_requires_explicit_confirmation() {
    let env = setup_test_env();
    run_gno(&env.config_path, &["update"]);

    let (_, stderr, success) = run_gno(&env.config_path, &["reset"]);
    assert!(!success, "reset without --yes must be refused");
    assert!(stderr.contains("--yes"));

    let (_, _, confirmed) = run_gno(&env.config_path, &["reset", "--yes"]);
    assert!(confirmed);

    let (status, _) = run_gno_json(&env.config_path, &["status"]);
    let total_docs: i64 = status["collections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["documents"].as_i64().unwrap_or(0))
        .sum();
    assert_eq!(total_docs, 0, "reset should drop every ingested document");
}

#[test]
fn doctor_reports_a_healthy_store() {
    let env = setup_test_env();

    let (checks, success) = run_gno_json(&env.config_path, &["doctor"]);
    assert!(success);
    assert!(checks.as_array().unwrap().iter().all(|c| c["healthy"].as_bool().unwrap_or(false)));
}
