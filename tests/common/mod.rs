pub mod http_mock;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use connkit::auth::AuthFlow;
use connkit::config::{ApiKeyPlacement, ConnectorConfig, CredentialsConfig};
use connkit::observer::{Observer, RequestInfo};
use connkit::{ConnectorError, RetryPolicy};
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";

/// Config for a static-key connection against `server`, with fast retries.
#[allow(dead_code)]
pub fn api_key_config(server: &MockServer) -> ConnectorConfig {
    ConnectorConfig::builder(
        &server.uri(),
        CredentialsConfig::ApiKey {
            key: API_KEY.into(),
            placement: ApiKeyPlacement::Header,
        },
    )
    .name("mock")
    .allow_http(true)
    .retry(fast_retry(3))
    .build()
    .unwrap()
}

/// Config for an OAuth connection that starts from a refresh token.
#[allow(dead_code)]
pub fn oauth_config(server: &MockServer, refresh_token: Option<&str>) -> ConnectorConfig {
    ConnectorConfig::builder(
        &server.uri(),
        CredentialsConfig::Oauth {
            client_id: "cid".into(),
            client_secret: Some("csecret".into()),
            redirect_uri: "http://localhost:8765/callback".into(),
            authorization_code: None,
            code_verifier: None,
            refresh_token: refresh_token.map(str::to_string),
            scopes: vec![],
        },
    )
    .name("mock-oauth")
    .allow_http(true)
    .retry(fast_retry(3))
    .build()
    .unwrap()
}

#[allow(dead_code)]
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_retries(max_retries)
        .with_base_delay(Duration::from_millis(10))
}

/// Observer that records retry delays and credential acquisitions.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingObserver {
    pub delays: Mutex<Vec<Duration>>,
    pub refreshes: Mutex<Vec<(AuthFlow, bool)>>,
    pub attempts: Mutex<Vec<u32>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn refreshes(&self) -> Vec<(AuthFlow, bool)> {
        self.refreshes.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Observer for RecordingObserver {
    fn pre_request(&self, info: &RequestInfo) {
        self.attempts.lock().unwrap().push(info.attempt);
    }

    fn on_retry(&self, _info: &RequestInfo, delay: Duration, _error: &ConnectorError) {
        self.delays.lock().unwrap().push(delay);
    }

    fn on_refresh(&self, flow: AuthFlow, outcome: Result<(), &ConnectorError>) {
        self.refreshes.lock().unwrap().push((flow, outcome.is_ok()));
    }
}

/// Write a `connkit.json` with the given `connections` object into a temp dir.
#[allow(dead_code)]
pub fn temp_config(connections: serde_json::Value) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("connkit.json");
    let json = serde_json::json!({ "connections": connections });
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    (dir, path)
}
