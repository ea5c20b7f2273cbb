use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ApiKeyPlacement;

/// Header used for static API keys placed in headers.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Query parameter used for static API keys placed in the query string.
pub const API_KEY_QUERY_PARAM: &str = "api_key";

/// Token material returned by an OAuth-style token endpoint.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenData {
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::ZERO)
    }

    /// True when the token expires within `margin` from now. Tokens without an
    /// expiry never expire.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires) => chrono::Duration::from_std(margin)
                .ok()
                .and_then(|m| Utc::now().checked_add_signed(m))
                .map_or(true, |deadline| deadline >= expires),
            None => false,
        }
    }
}

/// The credential currently used to authorize outbound calls.
#[derive(Clone, PartialEq)]
pub enum Credential {
    /// Static key, never expires and cannot be refreshed.
    ApiKey {
        key: String,
        placement: ApiKeyPlacement,
    },
    /// OAuth bearer token, possibly refreshable.
    OAuth(TokenData),
    /// Short-lived token minted from a signed JWT assertion; re-minted on expiry.
    JwtBearer(TokenData),
}

/// How a credential is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Header { name: String, value: String },
    Query { name: String, value: String },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ApiKey { .. } => "api-key",
            Credential::OAuth(_) => "oauth",
            Credential::JwtBearer(_) => "jwt-bearer",
        }
    }

    /// Valid means `now < expiry - margin`.
    pub fn is_usable(&self, margin: Duration) -> bool {
        match self {
            Credential::ApiKey { .. } => true,
            Credential::OAuth(token) | Credential::JwtBearer(token) => {
                !token.expires_within(margin)
            }
        }
    }

    pub fn token(&self) -> Option<&TokenData> {
        match self {
            Credential::ApiKey { .. } => None,
            Credential::OAuth(token) | Credential::JwtBearer(token) => Some(token),
        }
    }

    /// Refresh token, only ever present on OAuth credentials.
    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            Credential::OAuth(token) => token.refresh_token.as_deref(),
            _ => None,
        }
    }

    pub fn attachment(&self) -> Attachment {
        match self {
            Credential::ApiKey {
                key,
                placement: ApiKeyPlacement::Header,
            } => Attachment::Header {
                name: API_KEY_HEADER.to_string(),
                value: key.clone(),
            },
            Credential::ApiKey {
                key,
                placement: ApiKeyPlacement::Query,
            } => Attachment::Query {
                name: API_KEY_QUERY_PARAM.to_string(),
                value: key.clone(),
            },
            Credential::OAuth(token) | Credential::JwtBearer(token) => Attachment::Header {
                name: "Authorization".to_string(),
                value: format!("Bearer {}", token.access_token),
            },
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey { placement, .. } => f
                .debug_struct("ApiKey")
                .field("placement", placement)
                .finish_non_exhaustive(),
            Credential::OAuth(token) => f.debug_tuple("OAuth").field(token).finish(),
            Credential::JwtBearer(token) => f.debug_tuple("JwtBearer").field(token).finish(),
        }
    }
}
