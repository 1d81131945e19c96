//! CLI tests: run the `papertrail` binary against a temporary corpus.
//!
//! Uses the offline `hashing` embedder so no network access is needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn papertrail_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_papertrail"))
}

/// Minimal single-page PDF showing `phrase` in Helvetica, with a correct
/// xref table so pdf-extract can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::new();
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("ids.txt"),
        "Infant-directed speech has higher pitch variability than adult-directed speech.",
    )
    .unwrap();
    fs::write(docs.join("birds.pdf"), minimal_pdf("magnetic compass in migratory birds")).unwrap();

    fs::write(
        root.join("metadata.json"),
        r#"[
  {
    "id": "fernald1989",
    "title": "Intonation and communicative intent",
    "source_kind": "local_file",
    "source_location": "docs/ids.txt",
    "authors": ["Fernald, A."],
    "year": 1989
  },
  {
    "id": "wiltschko2005",
    "title": "Avian magnetoreception",
    "source_kind": "local_file",
    "source_location": "docs/birds.pdf",
    "tags": ["birds"]
  }
]"#,
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("papertrail.toml");
    fs::write(
        &config_path,
        format!(
            r#"[registry]
path = "{root}/metadata.json"

[index]
path = "{root}/index/papertrail-index.json"

[chunking]
chunk_size = 300
chunk_overlap = 30

[retrieval]
top_k = 4

[embedding]
provider = "hashing"
dims = 64

[generation]
provider = "disabled"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(papertrail_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run papertrail")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_sources_lists_registry_in_order() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["sources"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    let first = text.find("fernald1989").unwrap();
    let second = text.find("wiltschko2005").unwrap();
    assert!(first < second);
    assert!(text.contains("local_file"));
}

#[test]
fn test_index_builds_then_reuses() {
    let (_tmp, config) = setup_test_env();

    let output = run(&config, &["index"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("index rebuilt (no persisted index)"), "{}", text);
    assert!(text.contains("chunks:  2"), "{}", text);

    let output = run(&config, &["index"]);
    assert!(stdout(&output).contains("index up to date"));

    let output = run(&config, &["index", "--rebuild"]);
    assert!(stdout(&output).contains("index rebuilt (rebuild requested)"));
}

#[test]
fn test_search_finds_pdf_text() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["search", "magnetic compass birds", "--limit", "1"]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    assert!(text.contains("Avian magnetoreception"), "{}", text);
    assert!(text.contains("wiltschko2005::chunk_00000"), "{}", text);
    assert!(!text.contains("fernald1989"));
}

#[test]
fn test_ask_fails_when_generation_disabled() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["ask", "How does infant-directed speech differ in pitch?"]);
    assert!(!output.status.success());
}

#[test]
fn test_ask_rejects_empty_question() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["ask", "  "]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("empty"), "{}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("absent.toml"), &["sources"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
