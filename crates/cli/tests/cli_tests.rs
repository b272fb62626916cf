//! CLI integration tests

use std::process::{Command, Output};

fn nprec(args: &[&str], home: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nprec"))
        .args(args)
        .env("HOME", home)
        .env("NO_COLOR", "1")
        .env_remove("NPREC_API_URL")
        .env_remove("NPREC_TOKEN")
        .output()
        .expect("Failed to execute command")
}

fn run(args: &[&str]) -> Output {
    let home = tempfile::tempdir().unwrap();
    nprec(args, home.path())
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("node-pool recommender"), "Should show app name");
    assert!(stdout.contains("recommend"), "Should show recommend command");
    assert!(stdout.contains("attributes"), "Should show attributes command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("config"), "Should show config command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = run(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("nprec"), "Should show binary name");
}

#[test]
fn test_recommend_help() {
    let output = run(&["recommend", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in [
        "--cpu",
        "--memory-gib",
        "--gpu",
        "--min-nodes",
        "--max-nodes",
        "--on-demand-pct",
        "--zone",
        "--network-tier",
        "--exclude",
        "--vcpu-bucket",
        "--current-gen",
    ] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

#[test]
fn test_global_options() {
    let output = run(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"));
    assert!(stdout.contains("NPREC_API_URL"));
    assert!(stdout.contains("--token"));
    assert!(stdout.contains("--format"));
}

#[test]
fn test_missing_cpu_argument() {
    let output = run(&["recommend", "--provider", "aws", "--region", "eu-west-1"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("--cpu"));
}

#[test]
fn test_missing_region_without_defaults() {
    let output = run(&["attributes", "--provider", "aws"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("No region given"));
}

#[test]
fn test_invalid_command() {
    let output = run(&["optimize"]);
    assert!(!output.status.success());
}

#[test]
fn test_attributes_against_service() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/recommender/aws/eu-west-1/attributes/cpu")
        .match_header("authorization", "Bearer secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"attribute": "cpu", "values": [2, 4, 8]}"#)
        .create();

    let output = run(&[
        "--api-url",
        &server.url(),
        "--token",
        "secret",
        "--format",
        "json",
        "attributes",
        "--provider",
        "aws",
        "--region",
        "eu-west-1",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    mock.assert();
    let body: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["values"], serde_json::json!([2, 4, 8]));
}

#[test]
fn test_service_error_is_reported() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/api/v1/recommender/aws/eu-west-1/cluster")
        .with_status(500)
        .with_body(r#"{"code": "infeasible", "message": "no allocation satisfies the request"}"#)
        .create();

    let output = run(&[
        "--api-url",
        &server.url(),
        "recommend",
        "--provider",
        "aws",
        "--region",
        "eu-west-1",
        "--cpu",
        "1000",
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("infeasible"));
}

#[test]
fn test_config_defaults_are_used() {
    let home = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/recommender/gcp/europe-west1/attributes/cpu")
        .with_status(200)
        .with_body(r#"{"attribute": "cpu", "values": [4]}"#)
        .create();

    let output = nprec(
        &[
            "config",
            "set",
            "--api-url",
            &server.url(),
            "--provider",
            "gcp",
            "--region",
            "europe-west1",
        ],
        home.path(),
    );
    assert!(output.status.success());
    assert!(home.path().join(".config/nprec/config.json").exists());

    let output = nprec(&["attributes"], home.path());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    mock.assert();
    assert!(stdout.contains("gcp/europe-west1"));
}
