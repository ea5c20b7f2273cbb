use std::path::PathBuf;
use std::time::Duration;

/// Why a failure is considered transient and eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    /// The per-call deadline elapsed before a response arrived.
    Timeout,
    /// DNS, connect, or read failure below HTTP.
    Network,
    /// The provider answered with a 5xx status.
    ServerError,
    /// The provider signalled rate limiting (429, or 503 with Retry-After).
    RateLimited,
}

impl std::fmt::Display for TransientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransientReason::Timeout => "timeout",
            TransientReason::Network => "network error",
            TransientReason::ServerError => "server error",
            TransientReason::RateLimited => "rate limited",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("{}", format_auth(.message, *.status))]
    Auth { message: String, status: Option<u16> },

    #[error("{}", format_transient(*.reason, *.status, .message))]
    Transient {
        reason: TransientReason,
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{}", format_client_error(*.status, .code.as_deref(), .message))]
    PermanentClient {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Request failed after {attempts} attempt(s): {last}")]
    RequestFailed {
        attempts: u32,
        last: Box<ConnectorError>,
    },

    #[error("Cannot {operation} job {job_id} while it is {state}")]
    InvalidState {
        job_id: String,
        operation: &'static str,
        state: String,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Webhook signature rejected: {0}")]
    Signature(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection '{0}' not found.")]
    ConnectionNotFound(String),

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn format_auth(message: &str, status: Option<u16>) -> String {
    match status {
        Some(s) => format!("Authentication failed (HTTP {s}): {message}"),
        None => format!("Authentication failed: {message}"),
    }
}

fn format_transient(reason: TransientReason, status: Option<u16>, message: &str) -> String {
    match status {
        Some(s) => format!("Transient {reason} (HTTP {s}): {message}"),
        None => format!("Transient {reason}: {message}"),
    }
}

fn format_client_error(status: u16, code: Option<&str>, message: &str) -> String {
    match code {
        Some(c) => format!("Request rejected with HTTP {status} [{c}]: {message}"),
        None => format!("Request rejected with HTTP {status}: {message}"),
    }
}

impl ConnectorError {
    /// Shorthand for an authentication failure without an HTTP status.
    pub fn auth(message: impl Into<String>) -> Self {
        ConnectorError::Auth {
            message: message.into(),
            status: None,
        }
    }

    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            ConnectorError::Auth { .. } => "auth_error",
            ConnectorError::Transient { .. } => "transient_error",
            ConnectorError::PermanentClient { .. } => "client_error",
            ConnectorError::RequestFailed { .. } => "request_failed",
            ConnectorError::InvalidState { .. } => "invalid_state",
            ConnectorError::Validation(_) => "validation_error",
            ConnectorError::Signature(_) => "signature_error",
            ConnectorError::Cancelled => "cancelled",
            ConnectorError::ConnectionNotFound(_) => "not_found",
            ConnectorError::ConfigError { .. } => "config_error",
            ConnectorError::ProtocolError(_) => "parse_error",
            ConnectorError::IoError(_) => "io_error",
        }
    }

    /// Provider HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectorError::Auth { status, .. } => *status,
            ConnectorError::Transient { status, .. } => *status,
            ConnectorError::PermanentClient { status, .. } => Some(*status),
            ConnectorError::RequestFailed { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Whether the request pipeline may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectorError::Transient { .. })
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Produce a structured JSON error object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        if let Some(status) = self.status() {
            obj.insert("status".into(), serde_json::Value::from(status));
        }
        if let ConnectorError::PermanentClient {
            code: Some(provider_code),
            ..
        } = self
        {
            obj.insert(
                "providerCode".into(),
                serde_json::Value::String(provider_code.clone()),
            );
        }
        serde_json::json!({ "error": obj })
    }
}
