use std::fs;
use std::path::Path;

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

/// A zlens process isolated from the developer's real environment: its own
/// working directory (no stray `.env` or `.zlens`), its own config home,
/// and none of the ZLENS_* variables leaking in.
fn zlens(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("zlens").expect("zlens binary");
    cmd.current_dir(workdir)
        .env("XDG_CONFIG_HOME", workdir.join("config-home"))
        .env_remove("ZLENS_API_URL")
        .env_remove("ZLENS_LOGS_URL")
        .env_remove("ZLENS_ARCHIVE_POST_URL")
        .env_remove("ZLENS_ARCHIVE_URL")
        .env_remove("ZLENS_ENV_FILE");
    cmd
}

fn sample_trace() -> Value {
    json!([
        {
            "traceId": "abc",
            "id": "root1",
            "name": "get /",
            "timestamp": 1_000u64,
            "duration": 900u64,
            "localEndpoint": {"serviceName": "frontend"}
        },
        {
            "traceId": "abc",
            "id": "api1",
            "parentId": "root1",
            "name": "get /api",
            "timestamp": 1_100u64,
            "duration": 600u64,
            "localEndpoint": {"serviceName": "backend"}
        },
        {
            "traceId": "abc",
            "id": "db1",
            "parentId": "api1",
            "name": "select",
            "timestamp": 1_200u64,
            "duration": 300u64,
            "localEndpoint": {"serviceName": "mysql"}
        }
    ])
}

fn mock_trace_endpoint(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/trace/abc");
        then.status(200).json_body(sample_trace());
    });
}

#[test]
fn help_lists_every_subcommand() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("trace"))
        .stdout(predicate::str::contains("archive"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("logs"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn trace_json_emits_projected_rows_with_depth() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);

    let output = zlens(tmp.path())
        .args(["trace", "abc", "--json", "--api-url", &server.base_url()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let payload: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(payload["traceId"], "abc");
    assert_eq!(payload["spanCount"], 3);
    assert_eq!(payload["serviceCount"], 3);
    assert_eq!(payload["depth"], 3);
    assert_eq!(payload["bounds"]["min"], 1_000);
    assert_eq!(payload["bounds"]["max"], 1_900);

    let rows = payload["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["id"], "root1");
    assert_eq!(rows[0]["depth"], 0);
    assert!(rows[0]["hasChildren"].as_bool().expect("hasChildren"));
    assert_eq!(rows[1]["id"], "api1");
    assert_eq!(rows[1]["depth"], 1);
    assert_eq!(rows[2]["id"], "db1");
    assert_eq!(rows[2]["depth"], 2);
}

#[test]
fn trace_reroot_restricts_rows_to_the_subtree() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);

    let output = zlens(tmp.path())
        .args([
            "trace",
            "abc",
            "--json",
            "--reroot",
            "api1",
            "--api-url",
            &server.base_url(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let payload: Value = serde_json::from_slice(&output).expect("json output");
    let rows = payload["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "api1");
    assert_eq!(rows[0]["depth"], 0);
    assert_eq!(rows[1]["id"], "db1");
    assert_eq!(rows[1]["depth"], 1);
}

#[test]
fn trace_collapse_hides_descendants_in_plain_output() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);

    zlens(tmp.path())
        .args([
            "trace",
            "abc",
            "--non-interactive",
            "--collapse",
            "api1",
            "--api-url",
            &server.base_url(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("frontend"))
        .stdout(predicate::str::contains("get /api"))
        .stdout(predicate::str::contains("select").not());
}

#[test]
fn trace_with_no_spans_fails() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/trace/empty");
        then.status(200).json_body(json!([]));
    });

    zlens(tmp.path())
        .args(["trace", "empty", "--json", "--api-url", &server.base_url()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no spans found"));
}

#[test]
fn archive_success_exits_zero_and_posts_tagged_trace() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);
    let post_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/archive/api/v2/spans")
            .body_contains("zipkin.archived");
        then.status(202);
    });

    zlens(tmp.path())
        .args([
            "archive",
            "abc",
            "--api-url",
            &server.base_url(),
            "--archive-post-url",
            &server.url("/archive/api/v2/spans"),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Archive successful!"));

    post_mock.assert();
}

#[test]
fn archive_failure_exits_nonzero() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);
    server.mock(|when, then| {
        when.method(POST).path("/archive/api/v2/spans");
        then.status(500);
    });

    zlens(tmp.path())
        .args([
            "archive",
            "abc",
            "--api-url",
            &server.base_url(),
            "--archive-post-url",
            &server.url("/archive/api/v2/spans"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to archive the trace"));
}

#[test]
fn archive_without_endpoint_is_a_configuration_error() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .args(["archive", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No archive endpoint configured"));
}

#[test]
fn download_writes_parseable_json_to_a_file() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);
    let out_path = tmp.path().join("trace.json");

    zlens(tmp.path())
        .args([
            "download",
            "abc",
            "-o",
            out_path.to_str().expect("utf-8 path"),
            "--api-url",
            &server.base_url(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote 3 spans"));

    let written = fs::read_to_string(&out_path).expect("read downloaded file");
    let spans: Value = serde_json::from_str(&written).expect("downloaded JSON");
    assert_eq!(spans.as_array().map(Vec::len), Some(3));
    assert_eq!(spans[0]["id"], "root1");
}

#[test]
fn download_prints_to_stdout_without_output_flag() {
    let tmp = TempDir::new().expect("tempdir");
    let server = MockServer::start();
    mock_trace_endpoint(&server);

    let output = zlens(tmp.path())
        .args(["download", "abc", "--json", "--api-url", &server.base_url()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let spans: Value = serde_json::from_slice(&output).expect("stdout JSON");
    assert_eq!(spans.as_array().map(Vec::len), Some(3));
}

#[test]
fn logs_prints_the_expanded_template() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .args([
            "logs",
            "abc",
            "--logs-url",
            "https://kibana.example.com/search?q={traceId}",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "https://kibana.example.com/search?q=abc",
        ));
}

#[test]
fn logs_without_template_bails() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .args(["logs", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No logs URL configured"));
}

#[test]
fn config_set_then_get_round_trips_through_the_config_home() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .args(["config", "set", "api_url", "http://zipkin.internal:9411"])
        .assert()
        .success();

    zlens(tmp.path())
        .args(["config", "get", "api_url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://zipkin.internal:9411"));

    zlens(tmp.path())
        .args(["config", "unset", "api_url"])
        .assert()
        .success();

    zlens(tmp.path())
        .args(["config", "get", "api_url"])
        .assert()
        .failure();
}

#[test]
fn config_list_warns_about_unknown_file_keys_but_still_loads() {
    let tmp = TempDir::new().expect("tempdir");
    let config_dir = tmp.path().join("config-home").join("zlens");
    fs::create_dir_all(&config_dir).expect("config dir");
    fs::write(
        config_dir.join("config.json"),
        r#"{"api_url": "http://zipkin:9411", "colour": "green"}"#,
    )
    .expect("write config");

    zlens(tmp.path())
        .args(["config", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Unknown config key colour"))
        .stderr(predicate::str::contains("api_url: http://zipkin:9411"));
}

#[test]
fn config_rejects_unknown_keys() {
    let tmp = TempDir::new().expect("tempdir");
    zlens(tmp.path())
        .args(["config", "set", "api-url", "http://zipkin:9411"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));
}

#[test]
fn env_file_supplies_flag_values() {
    let tmp = TempDir::new().expect("tempdir");
    fs::write(
        tmp.path().join("custom.env"),
        "ZLENS_LOGS_URL=https://logs.example.com/{traceId}\n",
    )
    .expect("write env file");

    zlens(tmp.path())
        .args(["logs", "abc", "--env-file", "custom.env"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://logs.example.com/abc"));
}
