use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Lifetime of a signed assertion. Providers reject assertions that expire
/// more than a few minutes out.
pub const ASSERTION_LIFETIME: Duration = Duration::from_secs(180);

/// Grant type sent alongside a signed assertion.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

/// RS256 signer for JWT-bearer assertions.
pub struct JwtSigner {
    key: EncodingKey,
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner").finish_non_exhaustive()
    }
}

impl JwtSigner {
    pub fn from_pem(pem: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        Ok(Self { key })
    }

    /// Mint a fresh assertion valid from `now` for [`ASSERTION_LIFETIME`].
    pub fn assertion(
        &self,
        issuer: &str,
        subject: &str,
        audience: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ConnectorError> {
        let claims = AssertionClaims {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: audience.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ConnectorError::auth(format!("Failed to sign JWT assertion: {e}")))
    }
}
