//! CLI smoke tests against a live endpoint.

use assert_cmd::Command;
use predicates::str::contains;

use tether::test_harness::TestEndpoint;

#[test]
fn call_forwards_and_prints_json() {
    let endpoint = TestEndpoint::start();

    Command::cargo_bin("tether")
        .unwrap()
        .args(["call", "echo", r#"["roundtrip"]"#, "--socket"])
        .arg(endpoint.socket())
        .env("TETHER_TESTING", "1")
        .assert()
        .success()
        .stdout(contains("roundtrip"));
}

#[test]
fn ping_reports_pong() {
    let endpoint = TestEndpoint::start();

    Command::cargo_bin("tether")
        .unwrap()
        .arg("ping")
        .arg("--socket")
        .arg(endpoint.socket())
        .env("TETHER_TESTING", "1")
        .assert()
        .success()
        .stdout(contains("pong"));
}

#[test]
fn remote_failure_exits_nonzero() {
    let endpoint = TestEndpoint::start();

    Command::cargo_bin("tether")
        .unwrap()
        .args(["call", "no_such_method", "[]", "--socket"])
        .arg(endpoint.socket())
        .env("TETHER_TESTING", "1")
        .assert()
        .failure();
}
