//! Synchronous extension points for cross-cutting concerns.
//!
//! The pipeline and the auth manager call an [`Observer`] at four points:
//! before each attempt, after each response, before sleeping for a retry, and
//! after every credential acquisition. Observers must be cheap; they run inline.

use std::time::Duration;

use reqwest::Method;

use crate::auth::AuthFlow;
use crate::error::ConnectorError;

/// Identity of one attempt of one logical request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    /// Zero-based attempt number, including the re-authentication retry.
    pub attempt: u32,
}

pub trait Observer: Send + Sync {
    fn pre_request(&self, _info: &RequestInfo) {}

    fn post_response(&self, _info: &RequestInfo, _status: u16, _elapsed: Duration) {}

    fn on_retry(&self, _info: &RequestInfo, _delay: Duration, _error: &ConnectorError) {}

    fn on_refresh(&self, _flow: AuthFlow, _outcome: Result<(), &ConnectorError>) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Default observer: turns events into `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn pre_request(&self, info: &RequestInfo) {
        tracing::debug!(
            request_id = %info.request_id,
            method = %info.method,
            path = %info.path,
            attempt = info.attempt,
            "Sending request"
        );
    }

    fn post_response(&self, info: &RequestInfo, status: u16, elapsed: Duration) {
        tracing::debug!(
            request_id = %info.request_id,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Received response"
        );
    }

    fn on_retry(&self, info: &RequestInfo, delay: Duration, error: &ConnectorError) {
        tracing::warn!(
            request_id = %info.request_id,
            path = %info.path,
            attempt = info.attempt,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "Request failed, retrying after backoff"
        );
    }

    fn on_refresh(&self, flow: AuthFlow, outcome: Result<(), &ConnectorError>) {
        match outcome {
            Ok(()) => tracing::info!(flow = %flow, "Credential acquired"),
            Err(e) => tracing::warn!(flow = %flow, error = %e, "Credential acquisition failed"),
        }
    }
}
