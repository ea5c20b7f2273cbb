use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::http::request::{HttpRequest, HttpResponse};

impl std::fmt::Debug for dyn HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

/// Sends one fully-resolved HTTP request. Implementations perform no retries
/// and attach no credentials; the pipeline owns both.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and return the response, whatever its status.
    ///
    /// Only failures below HTTP (connect, DNS, read, timeout) are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ConnectorError>;
}
