use std::time::Duration;

use reqwest::{Method, Url};
use serde::Deserialize;

use crate::error::ConnectorError;
use crate::http::request::{extract_provider_error, HttpRequest};
use crate::transport::HttpTransport;

use super::credential::TokenData;
use super::jwt::JWT_BEARER_GRANT;

/// Client identity sent with every grant (`client_secret_post`).
#[derive(Clone, Copy)]
pub struct ClientAuth<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
}

/// Raw token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    fn into_token_data(self) -> TokenData {
        // An out-of-range lifetime is treated as no declared expiry.
        let expires_at = self.expires_in.and_then(|secs| {
            chrono::Duration::try_seconds(secs)
                .and_then(|lifetime| chrono::Utc::now().checked_add_signed(lifetime))
        });
        TokenData {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type,
            scope: self.scope,
        }
    }
}

/// Posts token requests through the connector's transport.
pub struct TokenClient<'a> {
    pub transport: &'a dyn HttpTransport,
    pub token_url: &'a Url,
    pub timeout: Duration,
}

impl TokenClient<'_> {
    pub async fn exchange_code(
        &self,
        client: ClientAuth<'_>,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenData, ConnectorError> {
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            fields.push(("code_verifier", verifier));
        }
        self.post("Authorization code exchange", client, fields).await
    }

    pub async fn refresh(
        &self,
        client: ClientAuth<'_>,
        refresh_token: &str,
    ) -> Result<TokenData, ConnectorError> {
        let fields = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.post("Token refresh", client, fields).await
    }

    /// Resource-owner password grant. The security token, if any, is appended
    /// to the password.
    pub async fn password(
        &self,
        client: ClientAuth<'_>,
        username: &str,
        password: &str,
        security_token: Option<&str>,
    ) -> Result<TokenData, ConnectorError> {
        let combined = format!("{password}{}", security_token.unwrap_or_default());
        let fields = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", combined.as_str()),
        ];
        self.post("Password grant", client, fields).await
    }

    pub async fn jwt_bearer(&self, assertion: &str) -> Result<TokenData, ConnectorError> {
        let fields = vec![("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)];
        self.post_fields("JWT bearer grant", fields).await
    }

    async fn post(
        &self,
        what: &str,
        client: ClientAuth<'_>,
        mut fields: Vec<(&str, &str)>,
    ) -> Result<TokenData, ConnectorError> {
        fields.push(("client_id", client.client_id));
        if let Some(secret) = client.client_secret {
            fields.push(("client_secret", secret));
        }
        self.post_fields(what, fields).await
    }

    async fn post_fields(
        &self,
        what: &str,
        fields: Vec<(&str, &str)>,
    ) -> Result<TokenData, ConnectorError> {
        let request = HttpRequest::new(Method::POST, self.token_url.clone()).form(&fields);

        let resp = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| {
                ConnectorError::auth(format!(
                    "{what} request timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| ConnectorError::auth(format!("{what} request failed: {e}")))?;

        if !resp.is_success() {
            let (code, message) = extract_provider_error(&resp.body);
            let message = match code {
                Some(code) if code != message => format!("{code}: {message}"),
                _ => message,
            };
            return Err(ConnectorError::Auth {
                message: format!("{what} failed: {message}"),
                status: Some(resp.status),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&resp.body).map_err(|e| {
            ConnectorError::auth(format!("Failed to parse {what} response: {e}"))
        })?;
        Ok(token.into_token_data())
    }
}
