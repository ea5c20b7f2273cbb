use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level shape of a `connkit.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnkitConfig {
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

/// One named connection as written in the config file.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub description: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter: Option<bool>,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub credentials: CredentialsConfig,
}

/// Where a static API key travels on each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiKeyPlacement {
    /// `X-API-Key: <key>`
    #[default]
    Header,
    /// `?api_key=<key>`
    Query,
}

/// The identity used to obtain credentials. Exactly one variant per connection;
/// the variant selects the authentication flow.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialsConfig {
    #[serde(rename_all = "camelCase")]
    ApiKey {
        key: String,
        #[serde(default)]
        placement: ApiKeyPlacement,
    },
    #[serde(rename_all = "camelCase")]
    Oauth {
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        redirect_uri: String,
        /// Single-use code obtained out of band; exchanged on first use.
        #[serde(default)]
        authorization_code: Option<String>,
        #[serde(default)]
        code_verifier: Option<String>,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        scopes: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Password {
        username: String,
        password: String,
        #[serde(default)]
        security_token: Option<String>,
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Jwt {
        /// PEM-encoded RSA private key.
        private_key: String,
        subject: String,
        client_id: String,
        #[serde(default)]
        audience: Option<String>,
    },
}

impl CredentialsConfig {
    /// Short name of the flow, used in logs and `config show`.
    pub fn flow_name(&self) -> &'static str {
        match self {
            CredentialsConfig::ApiKey { .. } => "api-key",
            CredentialsConfig::Oauth { .. } => "oauth",
            CredentialsConfig::Password { .. } => "password",
            CredentialsConfig::Jwt { .. } => "jwt-bearer",
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&String> = self.headers.keys().collect();
        f.debug_struct("ConnectionConfig")
            .field("base_url", &self.base_url)
            .field("token_url", &self.token_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("allow_http", &self.allow_http)
            .field("has_webhook_secret", &self.webhook_secret.is_some())
            .field("headers", &header_names)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

// Secrets are never printed; only identifying fields are shown.
impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsConfig::ApiKey { placement, .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .field("placement", placement)
                .finish(),
            CredentialsConfig::Oauth {
                client_id,
                redirect_uri,
                authorization_code,
                refresh_token,
                ..
            } => f
                .debug_struct("Oauth")
                .field("client_id", client_id)
                .field("redirect_uri", redirect_uri)
                .field("has_authorization_code", &authorization_code.is_some())
                .field("has_refresh_token", &refresh_token.is_some())
                .finish_non_exhaustive(),
            CredentialsConfig::Password {
                username, client_id, ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            CredentialsConfig::Jwt {
                subject, client_id, ..
            } => f
                .debug_struct("Jwt")
                .field("subject", subject)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotatedConnectionConfig {
    pub name: String,
    pub config: ConnectionConfig,
    pub source: PathBuf,
}
