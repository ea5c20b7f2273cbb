//! The request pipeline: every outbound call goes through here.
//!
//! Per logical call the pipeline attaches the current credential, enforces the
//! per-attempt timeout, retries transient failures with exponential backoff,
//! and replaces a rejected credential once on HTTP 401 without spending the
//! retry budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::auth::{Attachment, AuthManager, Credential};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, TransientReason};
use crate::observer::{Observer, RequestInfo};
use crate::transport::HttpTransport;

use super::request::{HttpRequest, HttpResponse, RequestSpec};

/// Header carrying the per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub struct RequestPipeline {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn HttpTransport>,
    auth: Arc<AuthManager>,
    observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("connection", &self.config.name)
            .field("retry", &self.config.retry)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    pub fn new(
        config: Arc<ConnectorConfig>,
        transport: Arc<dyn HttpTransport>,
        auth: Arc<AuthManager>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            config,
            transport,
            auth,
            observer,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub async fn execute(&self, spec: &RequestSpec) -> Result<HttpResponse, ConnectorError> {
        self.execute_cancellable(spec, &CancellationToken::new())
            .await
    }

    /// Execute `spec` and decode a JSON response body. An empty body decodes
    /// as JSON `null`.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
    ) -> Result<T, ConnectorError> {
        let resp = self.execute(spec).await?;
        if resp.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(serde_json::Value::Null).map_err(|e| {
                ConnectorError::ProtocolError(format!(
                    "Empty HTTP {} response body: {e}",
                    resp.status
                ))
            });
        }
        resp.json()
    }

    /// Execute `spec`, aborting promptly with [`ConnectorError::Cancelled`]
    /// when `cancel` fires, including while sleeping between retries.
    pub async fn execute_cancellable(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ConnectorError> {
        let url = self.config.endpoint(&spec.path)?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let policy = &self.config.retry;

        let mut attempt: u32 = 0;
        let mut retries: u32 = 0;
        let mut reauthenticated = false;

        loop {
            let credential = cancellable(cancel, self.auth.get_valid_credential()).await?;
            let info = RequestInfo {
                request_id: request_id.clone(),
                method: spec.method.clone(),
                path: spec.path.clone(),
                attempt,
            };
            attempt += 1;

            let request = build_request(spec, &url, &credential, &request_id);
            self.observer.pre_request(&info);
            let started = Instant::now();

            let outcome = cancellable(cancel, async {
                match tokio::time::timeout(self.config.timeout, self.transport.send(request)).await
                {
                    Ok(result) => Ok(result),
                    Err(_) => Ok(Err(ConnectorError::Transient {
                        reason: TransientReason::Timeout,
                        status: None,
                        message: format!(
                            "No response within {}ms",
                            self.config.timeout.as_millis()
                        ),
                        retry_after: None,
                    })),
                }
            })
            .await?;

            let error = match outcome {
                Ok(resp) => {
                    self.observer
                        .post_response(&info, resp.status, started.elapsed());
                    if resp.is_success() {
                        return Ok(resp);
                    }
                    if resp.status == 401 && !reauthenticated {
                        reauthenticated = true;
                        tracing::debug!(
                            request_id = %request_id,
                            path = %spec.path,
                            "Credential rejected, re-authenticating"
                        );
                        cancellable(cancel, self.auth.reauthenticate(&credential)).await?;
                        continue;
                    }
                    resp.into_error()
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if !policy.should_retry(&error, retries) {
                tracing::warn!(
                    request_id = %request_id,
                    path = %spec.path,
                    attempts = attempt,
                    "Retry budget exhausted"
                );
                return Err(ConnectorError::RequestFailed {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.delay_for(retries, &error);
            self.observer.on_retry(&info, delay, &error);
            retries += 1;
            cancellable(cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }
    }
}

/// Race `fut` against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ConnectorError>>,
) -> Result<T, ConnectorError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        result = fut => result,
    }
}

fn build_request(
    spec: &RequestSpec,
    url: &Url,
    credential: &Credential,
    request_id: &str,
) -> HttpRequest {
    let mut url = url.clone();
    let mut headers = spec.headers.clone();
    headers.push((REQUEST_ID_HEADER.to_string(), request_id.to_string()));

    let mut query = spec.query.clone();
    match credential.attachment() {
        Attachment::Header { name, value } => headers.push((name, value)),
        Attachment::Query { name, value } => query.push((name, value)),
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }

    HttpRequest {
        method: spec.method.clone(),
        url,
        headers,
        body: spec.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{ApiKeyPlacement, CredentialsConfig};
    use crate::http::retry::RetryPolicy;
    use crate::observer::NoopObserver;

    /// Transport replaying a fixed script of statuses and recording requests.
    struct Scripted {
        script: Mutex<VecDeque<u16>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(statuses: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(statuses.iter().copied().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
            self.seen.lock().unwrap().push(request);
            let status = self.script.lock().unwrap().pop_front().unwrap_or(200);
            Ok(HttpResponse::new(status, br#"{"ok":true}"#.to_vec()))
        }
    }

    fn pipeline(
        transport: Arc<Scripted>,
        placement: ApiKeyPlacement,
        retry: RetryPolicy,
    ) -> RequestPipeline {
        let creds = CredentialsConfig::ApiKey {
            key: "secret-key".into(),
            placement,
        };
        let config = Arc::new(
            ConnectorConfig::builder("https://api.example.com/v1", creds)
                .retry(retry)
                .build()
                .unwrap(),
        );
        let observer: Arc<dyn Observer> = Arc::new(NoopObserver);
        let auth = Arc::new(
            AuthManager::new(config.clone(), transport.clone(), observer.clone()).unwrap(),
        );
        RequestPipeline::new(config, transport, auth, observer)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new().with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn attaches_api_key_header_and_request_id() {
        let transport = Scripted::new(&[200]);
        let p = pipeline(transport.clone(), ApiKeyPlacement::Header, fast_retry());
        p.execute(&RequestSpec::get("/accounts").query("limit", "5"))
            .await
            .unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.url.as_str(), "https://api.example.com/v1/accounts?limit=5");
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "X-API-Key" && v == "secret-key"));
        assert!(req.headers.iter().any(|(k, _)| k == REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn attaches_api_key_query_param() {
        let transport = Scripted::new(&[200]);
        let p = pipeline(transport.clone(), ApiKeyPlacement::Query, fast_retry());
        p.execute(&RequestSpec::get("/accounts")).await.unwrap();

        let req = &transport.requests()[0];
        assert_eq!(req.url.query(), Some("api_key=secret-key"));
    }

    #[tokio::test]
    async fn retries_reuse_the_same_request_id() {
        let transport = Scripted::new(&[503, 200]);
        let p = pipeline(transport.clone(), ApiKeyPlacement::Header, fast_retry());
        p.execute(&RequestSpec::get("/x")).await.unwrap();

        let ids: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| {
                r.headers
                    .iter()
                    .find(|(k, _)| k == REQUEST_ID_HEADER)
                    .map(|(_, v)| v.clone())
                    .unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempts() {
        let transport = Scripted::new(&[500, 500, 500]);
        let p = pipeline(
            transport.clone(),
            ApiKeyPlacement::Header,
            fast_retry().with_max_retries(2),
        );
        let err = p.execute(&RequestSpec::get("/x")).await.unwrap_err();
        match err {
            ConnectorError::RequestFailed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.status(), Some(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let transport = Scripted::new(&[404]);
        let p = pipeline(transport.clone(), ApiKeyPlacement::Header, fast_retry());
        let err = p.execute(&RequestSpec::get("/missing")).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::PermanentClient { status: 404, .. }
        ));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let transport = Scripted::new(&[200]);
        let p = pipeline(transport.clone(), ApiKeyPlacement::Header, fast_retry());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p
            .execute_cancellable(&RequestSpec::get("/x"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Cancelled));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn execute_json_handles_empty_body() {
        struct Empty;
        #[async_trait]
        impl HttpTransport for Empty {
            async fn send(&self, _: HttpRequest) -> Result<HttpResponse, ConnectorError> {
                Ok(HttpResponse::new(204, Vec::new()))
            }
        }

        let creds = CredentialsConfig::ApiKey {
            key: "k".into(),
            placement: ApiKeyPlacement::Header,
        };
        let config = Arc::new(
            ConnectorConfig::builder("https://api.example.com", creds)
                .build()
                .unwrap(),
        );
        let transport: Arc<dyn HttpTransport> = Arc::new(Empty);
        let observer: Arc<dyn Observer> = Arc::new(NoopObserver);
        let auth =
            Arc::new(AuthManager::new(config.clone(), transport.clone(), observer.clone()).unwrap());
        let p = RequestPipeline::new(config, transport, auth, observer);
        let value: serde_json::Value = p.execute_json(&RequestSpec::delete("/x/1")).await.unwrap();
        assert!(value.is_null());
    }
}
