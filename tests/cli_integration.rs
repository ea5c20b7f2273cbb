use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use common::http_mock::{mount_collection, PagedCollection};

/// Command isolated from the developer's own config files.
fn connkit_cmd(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("connkit").unwrap();
    cmd.env("HOME", home)
        .env_remove("CONNKIT_CONFIG")
        .env_remove("CONNKIT_WEBHOOK_SECRET")
        .current_dir(home);
    cmd
}

fn mock_connection(server: &MockServer) -> serde_json::Value {
    json!({
        "mock": {
            "baseUrl": server.uri(),
            "allowHttp": true,
            "maxRetries": 1,
            "retryBaseDelayMs": 10,
            "credentials": { "apiKey": { "key": common::API_KEY } }
        }
    })
}

#[test]
fn config_show_lists_connections_without_secrets() {
    let (dir, config) = common::temp_config(json!({
        "crm": {
            "baseUrl": "https://crm.example.com/api",
            "description": "Sales CRM",
            "webhookSecret": "whsec-do-not-print",
            "credentials": { "apiKey": { "key": "key-do-not-print" } }
        }
    }));
    connkit_cmd(dir.path())
        .args(["config", "show"])
        .env("CONNKIT_CONFIG", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("crm"))
        .stdout(predicate::str::contains("https://crm.example.com/api"))
        .stdout(predicate::str::contains("api-key"))
        .stdout(predicate::str::contains("Webhook secret: configured"))
        .stdout(predicate::str::contains("do-not-print").not());
}

#[test]
fn config_show_with_nothing_configured() {
    let dir = tempfile::tempdir().unwrap();
    connkit_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No connections configured."));
}

#[test]
fn unknown_connection_suggests_close_match() {
    let (dir, config) = common::temp_config(json!({
        "salesforce": {
            "baseUrl": "https://example.my.salesforce.com",
            "credentials": { "apiKey": { "key": "k" } }
        }
    }));
    connkit_cmd(dir.path())
        .args(["--config", config.to_str().unwrap(), "call", "salesforse", "GET", "/limits"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Did you mean 'salesforce'?"))
        .stderr(predicate::str::contains("Connection 'salesforse' not found."));
}

#[test]
fn json_mode_reports_errors_as_json() {
    let (dir, config) = common::temp_config(json!({}));
    let output = connkit_cmd(dir.path())
        .args(["--config", config.to_str().unwrap(), "call", "missing", "GET", "/", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["error"]["code"], "not_found");
}

#[test]
fn webhook_sign_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("event.json");
    std::fs::write(&payload, r#"{"id":"evt_9","type":"order.created"}"#).unwrap();

    let signed = connkit_cmd(dir.path())
        .args(["webhook", "sign", "--secret", "whsec_cli"])
        .arg("--file")
        .arg(&payload)
        .output()
        .unwrap();
    assert!(signed.status.success());
    let header = String::from_utf8(signed.stdout).unwrap().trim().to_string();
    assert!(header.starts_with("t="), "{header}");
    assert!(header.contains(",v1="), "{header}");

    connkit_cmd(dir.path())
        .args(["webhook", "verify", "--secret", "whsec_cli", "--signature", &header])
        .arg("--file")
        .arg(&payload)
        .assert()
        .success()
        .stdout(predicate::str::contains("Signature valid (order.created)"));

    connkit_cmd(dir.path())
        .args(["webhook", "verify", "--secret", "wrong", "--signature", &header])
        .arg("--file")
        .arg(&payload)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Webhook signature rejected"));
}

#[test]
fn webhook_stale_timestamp_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("event.json");
    std::fs::write(&payload, "{}").unwrap();

    let stale = chrono::Utc::now().timestamp() - 3600;
    let signed = connkit_cmd(dir.path())
        .args(["webhook", "sign", "--secret", "s", "--timestamp", &stale.to_string()])
        .arg("--file")
        .arg(&payload)
        .output()
        .unwrap();
    let header = String::from_utf8(signed.stdout).unwrap().trim().to_string();
    assert_eq!(header.split(',').next(), Some(format!("t={stale}").as_str()));

    connkit_cmd(dir.path())
        .args(["webhook", "verify", "--secret", "s", "--signature", &header])
        .arg("--file")
        .arg(&payload)
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_prints_status_and_body_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .and(query_param("limit", "2"))
        .and(header("x-api-key", common::API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "001A", "name": "Acme" },
            { "id": "001B", "name": "Globex" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (dir, config) = common::temp_config(mock_connection(&server));
    let assert = tokio::task::spawn_blocking(move || {
        connkit_cmd(dir.path())
            .args(["call", "mock", "GET", "/accounts", "limit:2", "--json"])
            .env("CONNKIT_CONFIG", &config)
            .assert()
    })
    .await
    .unwrap();
    assert
        .success()
        .stdout(predicate::str::contains("\"status\": 200"))
        .stdout(predicate::str::contains("Globex"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_failure_exits_non_zero_with_provider_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": "MALFORMED_QUERY", "message": "unexpected token" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (dir, config) = common::temp_config(mock_connection(&server));
    let assert = tokio::task::spawn_blocking(move || {
        connkit_cmd(dir.path())
            .args(["call", "mock", "POST", "/accounts", "name:Acme"])
            .env("CONNKIT_CONFIG", &config)
            .assert()
    })
    .await
    .unwrap();
    assert
        .failure()
        .stderr(predicate::str::contains("MALFORMED_QUERY"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_all_streams_items_one_per_line() {
    let server = MockServer::start().await;
    mount_collection(&server, "/contacts", PagedCollection::new(7, true)).await;

    let (dir, config) = common::temp_config(mock_connection(&server));
    let output = tokio::task::spawn_blocking(move || {
        connkit_cmd(dir.path())
            .args([
                "fetch-all",
                "mock",
                "/contacts",
                "--offset",
                "--page-size",
                "3",
                "--raw",
            ])
            .env("CONNKIT_CONFIG", &config)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let ids: Vec<u64> = stdout
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
}

#[test]
fn bulk_upsert_without_external_id_is_rejected() {
    let (dir, config) = common::temp_config(json!({
        "crm": {
            "baseUrl": "https://crm.example.com",
            "credentials": { "apiKey": { "key": "k" } }
        }
    }));
    let csv = dir.path().join("accounts.csv");
    std::fs::write(&csv, "Name\nAcme\n").unwrap();
    connkit_cmd(dir.path())
        .args(["--config", config.to_str().unwrap(), "bulk", "run", "crm", "Account", "upsert"])
        .arg("--file")
        .arg(&csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("external id"));
}
