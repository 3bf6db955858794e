//! CLI Integration Tests
//!
//! Runs the `codestage` binary against an in-process server.

use std::path::PathBuf;

use codestage_server::{Server, ServerConfig};
use tokio::process::Command;

// ============================================================================
// Test Helpers
// ============================================================================

fn codestage_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_codestage"))
}

/// Creates a temporary test script file.
fn create_test_script(content: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    file
}

/// Starts a server on an ephemeral port and returns its address.
async fn start_server() -> String {
    let server = Server::bind(ServerConfig::default().with_bind("127.0.0.1:0"))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(async move { server.run().await });
    addr
}

const PROGRAM: &str = r#"
    function hello() { return 'Hello, world!'; }
    codestage.export('add', (args) => ({ sum: args.a + args.b }));
    function fail() { throw new Error('nope'); }
"#;

// ============================================================================
// Argument Validation Tests
// ============================================================================

#[tokio::test]
async fn test_missing_subcommand_fails() {
    let output = Command::new(codestage_bin()).output().await.unwrap();
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_run_rejects_invalid_json_args() {
    let script = create_test_script(PROGRAM);
    let output = Command::new(codestage_bin())
        .args(["run", "127.0.0.1:1", script.path().to_str().unwrap(), "add", "-a", "{not json"])
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid JSON"));
}

#[tokio::test]
async fn test_serve_rejects_invalid_config() {
    let output = Command::new(codestage_bin())
        .args(["serve", "--max-capacity", "0"])
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_capacity"));
}

// ============================================================================
// Run Tests
// ============================================================================

#[tokio::test]
async fn test_run_prints_function_output() {
    let addr = start_server().await;
    let script = create_test_script(PROGRAM);

    let output = Command::new(codestage_bin())
        .args(["run", &addr, script.path().to_str().unwrap(), "hello"])
        .output()
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(output.stdout, b"Hello, world!".to_vec());
}

#[tokio::test]
async fn test_run_with_args_and_capacity() {
    let addr = start_server().await;
    let script = create_test_script(PROGRAM);

    let output = Command::new(codestage_bin())
        .args([
            "run", &addr, script.path().to_str().unwrap(), "add",
            "-a", r#"{"a": 2, "b": 3}"#,
        ])
        .output()
        .await
        .unwrap();
    assert_eq!(output.stdout, br#"{"sum":5}"#.to_vec());

    let output = Command::new(codestage_bin())
        .args(["run", &addr, script.path().to_str().unwrap(), "hello", "-n", "5"])
        .output()
        .await
        .unwrap();
    assert_eq!(output.stdout, b"Hello".to_vec());
}

#[tokio::test]
async fn test_run_reports_execution_error() {
    let addr = start_server().await;
    let script = create_test_script(PROGRAM);

    let output = Command::new(codestage_bin())
        .args(["run", &addr, script.path().to_str().unwrap(), "fail"])
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("execution"));
}

#[tokio::test]
async fn test_run_reports_compile_error() {
    let addr = start_server().await;
    let script = create_test_script("function (");

    let output = Command::new(codestage_bin())
        .args(["run", &addr, script.path().to_str().unwrap(), "hello"])
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("compile"));
}
