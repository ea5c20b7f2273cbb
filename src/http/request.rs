use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConnectorError, TransientReason};

/// Request payload.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Bytes { content_type: String, data: Vec<u8> },
}

/// One logical call, expressed relative to the connector's base URL.
///
/// The pipeline turns this into an [`HttpRequest`] on every attempt, attaching
/// whatever credential is current at that moment.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Replace any existing values for `key`.
    pub fn set_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn bytes(mut self, content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Bytes {
            content_type: content_type.into(),
            data: data.into(),
        };
        self
    }
}

/// A fully-resolved request handed to an [`HttpTransport`](crate::transport::HttpTransport).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ConnectorError::ProtocolError(format!(
                "Failed to parse HTTP {} response body: {e}",
                self.status
            ))
        })
    }

    /// `Retry-After` expressed in whole seconds. HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Map a non-success response onto the error taxonomy.
    pub fn into_error(self) -> ConnectorError {
        let (code, message) = extract_provider_error(&self.body);
        let message = if message.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            message
        };
        match self.status {
            401 => ConnectorError::Auth {
                message,
                status: Some(401),
            },
            408 => ConnectorError::Transient {
                reason: TransientReason::Timeout,
                status: Some(408),
                message,
                retry_after: None,
            },
            429 => ConnectorError::Transient {
                reason: TransientReason::RateLimited,
                status: Some(429),
                retry_after: self.retry_after(),
                message,
            },
            500..=599 => ConnectorError::Transient {
                reason: TransientReason::ServerError,
                status: Some(self.status),
                retry_after: self.retry_after(),
                message,
            },
            status => ConnectorError::PermanentClient {
                status,
                code,
                message,
            },
        }
    }
}

/// Pull a provider error code and message out of the common error body shapes:
/// `{"error":{"code","message"}}`, `{"errorCode","message"}`,
/// `[{"errorCode","message"}]`, and OAuth's `{"error","error_description"}`.
/// Falls back to the raw body text.
pub fn extract_provider_error(body: &[u8]) -> (Option<String>, String) {
    let raw = String::from_utf8_lossy(body).trim().to_string();
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return (None, raw);
    };

    let obj = match &value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    let Some(obj) = obj.and_then(Value::as_object) else {
        return (None, raw);
    };

    let as_string = |v: Option<&Value>| -> Option<String> {
        match v? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    if let Some(Value::Object(inner)) = obj.get("error") {
        let code = as_string(inner.get("code")).or_else(|| as_string(inner.get("type")));
        let message = as_string(inner.get("message")).unwrap_or_else(|| raw.clone());
        return (code, message);
    }

    let code = as_string(obj.get("errorCode"))
        .or_else(|| as_string(obj.get("error_code")))
        .or_else(|| as_string(obj.get("code")))
        .or_else(|| as_string(obj.get("error")));
    let message = as_string(obj.get("message"))
        .or_else(|| as_string(obj.get("error_description")))
        .or_else(|| as_string(obj.get("detail")))
        .unwrap_or(raw);
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, body.as_bytes().to_vec())
    }

    #[test]
    fn spec_builders() {
        let spec = RequestSpec::get("/accounts")
            .query("limit", "10")
            .query("limit", "20")
            .set_query("limit", "30")
            .header("X-Trace", "1");
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.query, vec![("limit".to_string(), "30".to_string())]);
        assert_eq!(spec.headers.len(), 1);
        assert!(matches!(spec.body, Body::Empty));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut resp = response(200, "{}");
        resp.headers.insert("retry-after".into(), "7".into());
        assert_eq!(resp.header("Retry-After"), Some("7"));
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut resp = response(429, "");
        resp.headers
            .insert("retry-after".into(), "Wed, 21 Oct 2015 07:28:00 GMT".into());
        assert_eq!(resp.retry_after(), None);
    }

    #[test]
    fn into_error_classifies_statuses() {
        assert!(matches!(
            response(401, "").into_error(),
            ConnectorError::Auth {
                status: Some(401),
                ..
            }
        ));
        assert!(response(429, "").into_error().is_retryable());
        assert!(response(503, "").into_error().is_retryable());
        assert!(response(408, "").into_error().is_retryable());
        let err = response(404, "").into_error();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[test]
    fn extract_nested_error_object() {
        let (code, msg) =
            extract_provider_error(br#"{"error":{"code":"invalid_request","message":"bad"}}"#);
        assert_eq!(code.as_deref(), Some("invalid_request"));
        assert_eq!(msg, "bad");
    }

    #[test]
    fn extract_array_of_errors() {
        let (code, msg) = extract_provider_error(
            br#"[{"errorCode":"MALFORMED_QUERY","message":"unexpected token: FORM"}]"#,
        );
        assert_eq!(code.as_deref(), Some("MALFORMED_QUERY"));
        assert_eq!(msg, "unexpected token: FORM");
    }

    #[test]
    fn extract_oauth_error() {
        let (code, msg) = extract_provider_error(
            br#"{"error":"invalid_grant","error_description":"expired access/refresh token"}"#,
        );
        assert_eq!(code.as_deref(), Some("invalid_grant"));
        assert_eq!(msg, "expired access/refresh token");
    }

    #[test]
    fn extract_falls_back_to_raw_text() {
        let (code, msg) = extract_provider_error(b"  Service Unavailable  ");
        assert!(code.is_none());
        assert_eq!(msg, "Service Unavailable");
    }

    #[test]
    fn permanent_error_carries_provider_code() {
        let err = response(400, r#"{"errorCode":"INVALID_FIELD","message":"No such column"}"#)
            .into_error();
        match err {
            ConnectorError::PermanentClient {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("INVALID_FIELD"));
                assert_eq!(message, "No such column");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
