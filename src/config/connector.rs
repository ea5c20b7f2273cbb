use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::auth::jwt::JwtSigner;
use crate::error::ConnectorError;
use crate::http::retry::RetryPolicy;

use super::types::{ConnectionConfig, CredentialsConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Validated, immutable connection parameters shared by every component of a
/// connector instance.
#[derive(Clone)]
pub struct ConnectorConfig {
    pub name: String,
    pub base_url: Url,
    pub token_url: Url,
    pub authorize_url: Url,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub expiry_margin: Duration,
    pub allow_http: bool,
    pub webhook_secret: Option<String>,
    pub headers: HashMap<String, String>,
    pub credentials: CredentialsConfig,
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("has_webhook_secret", &self.webhook_secret.is_some())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl ConnectorConfig {
    pub fn builder(base_url: &str, credentials: CredentialsConfig) -> ConnectorConfigBuilder {
        ConnectorConfigBuilder {
            name: "default".to_string(),
            base_url: base_url.to_string(),
            token_url: None,
            authorize_url: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            allow_http: false,
            webhook_secret: None,
            headers: HashMap::new(),
            credentials,
        }
    }

    /// Validate a connection entry from a config file.
    pub fn from_connection(name: &str, conn: &ConnectionConfig) -> Result<Self, ConnectorError> {
        let mut retry = RetryPolicy::default();
        if let Some(max) = conn.max_retries {
            retry = retry.with_max_retries(max);
        }
        if let Some(ms) = conn.retry_base_delay_ms {
            retry = retry.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(jitter) = conn.jitter {
            retry = retry.with_jitter(jitter);
        }

        let mut builder = Self::builder(&conn.base_url, conn.credentials.clone())
            .name(name)
            .retry(retry)
            .allow_http(conn.allow_http)
            .headers(conn.headers.clone());
        if let Some(ms) = conn.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ref url) = conn.token_url {
            builder = builder.token_url(url);
        }
        if let Some(ref url) = conn.authorize_url {
            builder = builder.authorize_url(url);
        }
        if let Some(ref secret) = conn.webhook_secret {
            builder = builder.webhook_secret(secret);
        }
        builder.build()
    }

    /// Resolve a request path against the base URL.
    ///
    /// Relative paths are appended to the base URL's path (so `/jobs` under
    /// `https://host/v2` becomes `https://host/v2/jobs`). Absolute URLs are
    /// accepted only when they share the base URL's origin (scheme, host and
    /// port), so credentials never leave the configured service.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConnectorError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path)
                .map_err(|e| ConnectorError::Validation(format!("Invalid URL '{path}': {e}")))?;
            if url.origin() != self.base_url.origin() {
                return Err(ConnectorError::Validation(format!(
                    "URL '{path}' does not belong to {}",
                    self.base_url
                )));
            }
            return Ok(url);
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| ConnectorError::Validation(format!("Invalid request path '{path}': {e}")))
    }
}

pub struct ConnectorConfigBuilder {
    name: String,
    base_url: String,
    token_url: Option<String>,
    authorize_url: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
    expiry_margin: Duration,
    allow_http: bool,
    webhook_secret: Option<String>,
    headers: HashMap<String, String>,
    credentials: CredentialsConfig,
}

impl ConnectorConfigBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn token_url(mut self, url: &str) -> Self {
        self.token_url = Some(url.to_string());
        self
    }

    pub fn authorize_url(mut self, url: &str) -> Self {
        self.authorize_url = Some(url.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    pub fn allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    pub fn webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn build(self) -> Result<ConnectorConfig, ConnectorError> {
        let base_url = self.parse_url("baseUrl", &self.base_url)?;
        let base = self.base_url.trim_end_matches('/');
        let token_url = match self.token_url {
            Some(ref url) => self.parse_url("tokenUrl", url)?,
            None => self.parse_url("tokenUrl", &format!("{base}/oauth2/token"))?,
        };
        let authorize_url = match self.authorize_url {
            Some(ref url) => self.parse_url("authorizeUrl", url)?,
            None => self.parse_url("authorizeUrl", &format!("{base}/oauth2/authorize"))?,
        };

        if self.timeout.is_zero() {
            return Err(self.invalid("timeoutMs must be greater than zero"));
        }
        if let Some(ref secret) = self.webhook_secret {
            if secret.is_empty() {
                return Err(self.invalid("webhookSecret must not be empty"));
            }
        }
        self.validate_credentials()?;

        Ok(ConnectorConfig {
            name: self.name,
            base_url,
            token_url,
            authorize_url,
            timeout: self.timeout,
            retry: self.retry,
            expiry_margin: self.expiry_margin,
            allow_http: self.allow_http,
            webhook_secret: self.webhook_secret,
            headers: self.headers,
            credentials: self.credentials,
        })
    }

    fn parse_url(&self, field: &str, raw: &str) -> Result<Url, ConnectorError> {
        let url = Url::parse(raw)
            .map_err(|e| self.invalid(&format!("Invalid {field} '{raw}': {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_http => Ok(url),
            "http" => Err(self.invalid(&format!(
                "Cleartext HTTP is not allowed for {field} '{raw}'. \
                 Use https:// or set allowHttp to permit insecure connections."
            ))),
            scheme => Err(self.invalid(&format!(
                "Unsupported URL scheme '{scheme}' in {field} '{raw}'"
            ))),
        }
    }

    fn validate_credentials(&self) -> Result<(), ConnectorError> {
        let require = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(self.invalid(&format!("credentials.{field} must not be empty")))
            } else {
                Ok(())
            }
        };
        match &self.credentials {
            CredentialsConfig::ApiKey { key, .. } => require("apiKey.key", key),
            CredentialsConfig::Oauth {
                client_id,
                redirect_uri,
                ..
            } => {
                require("oauth.clientId", client_id)?;
                require("oauth.redirectUri", redirect_uri)
            }
            CredentialsConfig::Password {
                username,
                password,
                client_id,
                ..
            } => {
                require("password.username", username)?;
                require("password.password", password)?;
                require("password.clientId", client_id)
            }
            CredentialsConfig::Jwt {
                private_key,
                subject,
                client_id,
                ..
            } => {
                require("jwt.subject", subject)?;
                require("jwt.clientId", client_id)?;
                JwtSigner::from_pem(private_key)
                    .map(|_| ())
                    .map_err(|e| self.invalid(&format!("credentials.jwt.privateKey: {e}")))
            }
        }
    }

    fn invalid(&self, detail: &str) -> ConnectorError {
        ConnectorError::ConfigError {
            path: PathBuf::from(format!("<connection:{}>", self.name)),
            detail: detail.to_string(),
        }
    }
}
