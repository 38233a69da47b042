use assert_cmd::Command;
use assert_cmd::cargo;
use mockito::Server;
use predicates::prelude::*;
use std::fs;
use tempfile::{TempDir, tempdir};

/// Writes `content` as a config file and returns its directory and path.
fn config_file(content: &str) -> (TempDir, String) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, content).unwrap();
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

fn reqflow(config: &str) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("reqflow"));
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_get_success() {
    let mut server = Server::new();
    let url = server.url();

    let mock = server
        .mock("GET", "/hello")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"greeting": "hi"}"#)
        .create();

    let (_dir, config) = config_file("{}");
    reqflow(&config)
        .arg("get")
        .arg(format!("{}/hello", url))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("HTTP 200 OK"))
        .stdout(predicate::str::contains(r#"{"greeting": "hi"}"#));

    mock.assert();
}

#[test]
fn test_get_include_headers_and_custom_header() {
    let mut server = Server::new();
    let url = server.url();

    let mock = server
        .mock("GET", "/")
        .match_header("authorization", "Bearer token")
        .with_status(200)
        .with_header("x-request-id", "abc")
        .with_body("ok")
        .create();

    let (_dir, config) = config_file("{}");
    reqflow(&config)
        .args(["get", "-i", "-H", "Authorization: Bearer token"])
        .arg(&url)
        .assert()
        .success()
        .stdout(predicate::str::contains("x-request-id: abc"))
        .stdout(predicate::str::ends_with("\nok\n"));

    mock.assert();
}

#[test]
fn test_get_unacceptable_status_exits_with_failure() {
    let mut server = Server::new();
    let url = server.url();

    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .with_body("not here")
        .create();

    let (_dir, config) = config_file("{}");
    reqflow(&config)
        .arg("get")
        .arg(format!("{}/missing", url))
        .assert()
        .failure()
        .stdout(predicate::str::contains("HTTP 404 Not Found"))
        .stderr(predicate::str::contains("Unacceptable status"));

    mock.assert();
}

#[test]
fn test_get_accept_flag_allows_status() {
    let mut server = Server::new();
    let url = server.url();

    let _mock = server.mock("GET", "/missing").with_status(404).create();

    let (_dir, config) = config_file("{}");
    reqflow(&config)
        .args(["get", "--accept", "200-299,404"])
        .arg(format!("{}/missing", url))
        .assert()
        .success();
}

#[test]
fn test_get_retries_until_success() {
    let mut server = Server::new();
    let url = server.url();

    // mockito serves the first matching mock until its hit count is reached
    let failing = server
        .mock("GET", "/flaky")
        .with_status(503)
        .expect(1)
        .create();
    let succeeding = server
        .mock("GET", "/flaky")
        .with_status(200)
        .with_body("recovered")
        .expect(1)
        .create();

    let (_dir, config) = config_file("{}");
    reqflow(&config)
        .args(["get", "--retries", "2"])
        .arg(format!("{}/flaky", url))
        .assert()
        .success()
        .stdout(predicate::str::contains("recovered"));

    failing.assert();
    succeeding.assert();
}

#[test]
fn test_config_file_retries() {
    let mut server = Server::new();
    let url = server.url();

    let mock = server
        .mock("GET", "/down")
        .with_status(500)
        .expect(3)
        .create();

    let (_dir, config) = config_file(r#"{"max_retries": 2}"#);
    reqflow(&config)
        .arg("get")
        .arg(format!("{}/down", url))
        .assert()
        .failure();

    mock.assert();
}

#[test]
fn test_config_command_prints_effective_config() {
    let (_dir, config) =
        config_file(r#"{"timeout_secs": 7, "acceptable_status_codes": "200,204"}"#);
    reqflow(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""timeout_secs": 7"#))
        .stdout(predicate::str::contains(r#""acceptable_status_codes": "200,204""#));
}

#[test]
fn test_invalid_config_file_fails() {
    let (_dir, config) = config_file("not json");
    reqflow(&config)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}
