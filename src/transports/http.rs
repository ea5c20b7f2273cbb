use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{ConnectorError, TransientReason};
use crate::http::request::{Body, HttpRequest, HttpResponse};
use crate::transport::HttpTransport;

/// `reqwest`-backed transport.
///
/// Carries the connection's static headers on every request. Deadlines are
/// enforced by the pipeline, not by the client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(headers: &HashMap<String, String>) -> Result<Self, ConnectorError> {
        let mut header_map = HeaderMap::new();
        header_map.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        header_map.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(concat!("connkit/", env!("CARGO_PKG_VERSION"))),
        );

        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                ConnectorError::Validation(format!("Invalid header name '{key}': {e}"))
            })?;
            let val = HeaderValue::from_str(value).map_err(|e| {
                ConnectorError::Validation(format!("Invalid header value for '{key}': {e}"))
            })?;
            header_map.insert(name, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| ConnectorError::Validation(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

fn map_send_error(err: reqwest::Error) -> ConnectorError {
    let reason = if err.is_timeout() {
        TransientReason::Timeout
    } else {
        TransientReason::Network
    };
    ConnectorError::Transient {
        reason,
        status: None,
        message: err.to_string(),
        retry_after: None,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
        let mut builder = self.client.request(request.method, request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Form(fields) => builder.form(&fields),
            Body::Bytes { content_type, data } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
        };

        let response = builder.send().await.map_err(map_send_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_send_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
