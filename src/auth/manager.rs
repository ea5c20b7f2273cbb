use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::Url;

use crate::config::{ConnectorConfig, CredentialsConfig};
use crate::error::ConnectorError;
use crate::observer::Observer;
use crate::transport::HttpTransport;

use super::credential::{Credential, TokenData};
use super::grants::{ClientAuth, TokenClient};
use super::jwt::JwtSigner;
use super::pkce::{self, PkceChallenge};
use super::store::TokenStore;
use super::AuthFlow;

#[derive(Clone)]
struct PendingCode {
    code: String,
    verifier: Option<String>,
}

/// Failure shared with every caller that waited on the same refresh.
#[derive(Clone)]
struct SharedFailure {
    message: String,
    status: Option<u16>,
}

impl SharedFailure {
    fn from_error(err: &ConnectorError) -> Self {
        let message = match err {
            ConnectorError::Auth { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            message,
            status: err.status(),
        }
    }

    fn into_error(self) -> ConnectorError {
        ConnectorError::Auth {
            message: self.message,
            status: self.status,
        }
    }
}

#[derive(Default)]
struct RefreshGate {
    /// Number of completed acquisitions.
    epoch: u64,
    last: Option<Result<Credential, SharedFailure>>,
}

/// Produces a currently valid credential for one connector instance.
///
/// At most one token acquisition is in flight at a time. Callers that find
/// the credential missing or expired while another caller is refreshing wait
/// for that refresh and share its outcome, success or failure.
pub struct AuthManager {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn HttpTransport>,
    observer: Arc<dyn Observer>,
    store: TokenStore,
    jwt: Option<JwtSigner>,
    pending_code: Mutex<Option<PendingCode>>,
    gate: tokio::sync::Mutex<RefreshGate>,
    completed: AtomicU64,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("connection", &self.config.name)
            .field("flow", &self.config.credentials.flow_name())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn new(
        config: Arc<ConnectorConfig>,
        transport: Arc<dyn HttpTransport>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, ConnectorError> {
        let store = TokenStore::new();
        let mut pending = None;
        let mut jwt = None;

        match &config.credentials {
            CredentialsConfig::Oauth {
                authorization_code,
                code_verifier,
                refresh_token,
                ..
            } => {
                store.set_refresh_token(refresh_token.clone());
                pending = authorization_code.clone().map(|code| PendingCode {
                    code,
                    verifier: code_verifier.clone(),
                });
            }
            CredentialsConfig::Jwt { private_key, .. } => {
                let signer = JwtSigner::from_pem(private_key).map_err(|e| {
                    ConnectorError::auth(format!("Invalid JWT signing key: {e}"))
                })?;
                jwt = Some(signer);
            }
            CredentialsConfig::ApiKey { .. } | CredentialsConfig::Password { .. } => {}
        }

        Ok(Self {
            config,
            transport,
            observer,
            store,
            jwt,
            pending_code: Mutex::new(pending),
            gate: tokio::sync::Mutex::new(RefreshGate::default()),
            completed: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Install a previously obtained token (e.g. loaded from the on-disk cache).
    pub fn seed(&self, token: TokenData) {
        let credential = match self.config.credentials {
            CredentialsConfig::Jwt { .. } => Credential::JwtBearer(token),
            _ => Credential::OAuth(token),
        };
        self.store.replace(credential);
    }

    /// Return a credential that is valid for at least the configured expiry
    /// margin, acquiring a new one if needed.
    pub async fn get_valid_credential(&self) -> Result<Credential, ConnectorError> {
        // Loaded before inspecting the store: a refresh that completes after
        // this point is visible through the gate.
        let seen = self.completed.load(Ordering::Acquire);
        if let Some(credential) = self.usable_current() {
            return Ok(credential);
        }

        let mut gate = self.gate.lock().await;
        if gate.epoch != seen {
            if let Some(outcome) = gate.last.clone() {
                tracing::debug!(connection = %self.config.name, "Reusing concurrent refresh result");
                return outcome.map_err(SharedFailure::into_error);
            }
        }
        if let Some(credential) = self.usable_current() {
            return Ok(credential);
        }
        self.refresh_locked(&mut gate).await
    }

    /// Forget the current credential so the next call re-acquires one.
    pub fn invalidate(&self) {
        tracing::debug!(connection = %self.config.name, "Invalidating credential");
        self.store.clear();
    }

    /// Replace a credential the provider rejected. If another caller already
    /// replaced `stale`, its replacement is returned without a new refresh.
    pub async fn reauthenticate(&self, stale: &Credential) -> Result<Credential, ConnectorError> {
        // Compared and cleared under the gate so a replacement installed by a
        // concurrent refresh is never discarded.
        let mut gate = self.gate.lock().await;
        if let Some(current) = self.usable_current() {
            if &current != stale {
                return Ok(current);
            }
        }
        self.invalidate();
        self.refresh_locked(&mut gate).await
    }

    /// Exchange an authorization code obtained interactively.
    pub async fn authorize_with_code(
        &self,
        code: String,
        code_verifier: Option<String>,
    ) -> Result<Credential, ConnectorError> {
        if !matches!(self.config.credentials, CredentialsConfig::Oauth { .. }) {
            return Err(ConnectorError::Validation(format!(
                "Connection '{}' uses the {} flow, not oauth",
                self.config.name,
                self.config.credentials.flow_name()
            )));
        }
        {
            let mut pending = self.pending_code.lock().unwrap_or_else(|e| e.into_inner());
            *pending = Some(PendingCode {
                code,
                verifier: code_verifier,
            });
        }
        self.invalidate();
        self.get_valid_credential().await
    }

    /// Browser URL that starts the authorization-code flow.
    pub fn authorization_url(
        &self,
        state: &str,
        pkce: &PkceChallenge,
    ) -> Result<Url, ConnectorError> {
        match &self.config.credentials {
            CredentialsConfig::Oauth {
                client_id,
                redirect_uri,
                scopes,
                ..
            } => Ok(pkce::authorization_url(
                &self.config.authorize_url,
                client_id,
                redirect_uri,
                scopes,
                state,
                pkce,
            )),
            other => Err(ConnectorError::Validation(format!(
                "Connection '{}' uses the {} flow, which has no authorization URL",
                self.config.name,
                other.flow_name()
            ))),
        }
    }

    /// Acquire a new credential and publish the outcome to waiting callers.
    /// The caller must hold the gate.
    async fn refresh_locked(&self, gate: &mut RefreshGate) -> Result<Credential, ConnectorError> {
        let (flow, result) = self.acquire().await;
        self.observer
            .on_refresh(flow, result.as_ref().map(|_| ()));

        let shared = match result {
            Ok(credential) => {
                self.store.replace(credential.clone());
                Ok(credential)
            }
            Err(e) => Err(SharedFailure::from_error(&e)),
        };
        gate.epoch += 1;
        gate.last = Some(shared.clone());
        self.completed.store(gate.epoch, Ordering::Release);

        shared.map_err(SharedFailure::into_error)
    }

    fn usable_current(&self) -> Option<Credential> {
        self.store
            .current()
            .filter(|c| c.is_usable(self.config.expiry_margin))
    }

    fn pending_code(&self) -> Option<PendingCode> {
        let pending = self.pending_code.lock().unwrap_or_else(|e| e.into_inner());
        pending.clone()
    }

    /// Drop the pending code once the provider has answered for it. A newer
    /// code installed meanwhile is left alone.
    fn spend_pending_code(&self, code: &str) {
        let mut pending = self.pending_code.lock().unwrap_or_else(|e| e.into_inner());
        if pending.as_ref().is_some_and(|p| p.code == code) {
            *pending = None;
        }
    }

    fn tokens(&self) -> TokenClient<'_> {
        TokenClient {
            transport: self.transport.as_ref(),
            token_url: &self.config.token_url,
            timeout: self.config.timeout,
        }
    }

    async fn acquire(&self) -> (AuthFlow, Result<Credential, ConnectorError>) {
        let tokens = self.tokens();
        match &self.config.credentials {
            CredentialsConfig::ApiKey { key, placement } => (
                AuthFlow::ApiKey,
                Ok(Credential::ApiKey {
                    key: key.clone(),
                    placement: *placement,
                }),
            ),
            CredentialsConfig::Oauth {
                client_id,
                client_secret,
                redirect_uri,
                ..
            } => {
                let client = ClientAuth {
                    client_id,
                    client_secret: client_secret.as_deref(),
                };
                if let Some(pending) = self.pending_code() {
                    let result = tokens
                        .exchange_code(
                            client,
                            &pending.code,
                            redirect_uri,
                            pending.verifier.as_deref(),
                        )
                        .await
                        .map(Credential::OAuth);
                    // Codes are single use once the provider has seen them;
                    // timeouts and server errors leave the code for a retry.
                    let answered = match &result {
                        Ok(_) => true,
                        Err(e) => e.status().is_some_and(|s| (400..500).contains(&s)),
                    };
                    if answered {
                        self.spend_pending_code(&pending.code);
                    }
                    return (AuthFlow::AuthorizationCode, result);
                }
                match self.store.refresh_token() {
                    Some(refresh_token) => (
                        AuthFlow::RefreshToken,
                        tokens
                            .refresh(client, &refresh_token)
                            .await
                            .map(Credential::OAuth),
                    ),
                    None => (
                        AuthFlow::RefreshToken,
                        Err(ConnectorError::auth("no refresh token")),
                    ),
                }
            }
            CredentialsConfig::Password {
                username,
                password,
                security_token,
                client_id,
                client_secret,
            } => {
                let client = ClientAuth {
                    client_id,
                    client_secret: client_secret.as_deref(),
                };
                if let Some(refresh_token) = self.store.refresh_token() {
                    match tokens.refresh(client, &refresh_token).await {
                        Ok(token) => return (AuthFlow::RefreshToken, Ok(Credential::OAuth(token))),
                        Err(e) => {
                            tracing::debug!(error = %e, "Refresh failed, falling back to password grant");
                        }
                    }
                }
                let result = tokens
                    .password(client, username, password, security_token.as_deref())
                    .await
                    .map(Credential::OAuth);
                (AuthFlow::Password, result)
            }
            CredentialsConfig::Jwt {
                subject,
                client_id,
                audience,
                ..
            } => {
                let Some(signer) = &self.jwt else {
                    return (
                        AuthFlow::JwtBearer,
                        Err(ConnectorError::auth("JWT signing key not loaded")),
                    );
                };
                let audience = audience
                    .clone()
                    .unwrap_or_else(|| self.config.token_url.origin().ascii_serialization());
                let result = match signer.assertion(client_id, subject, &audience, chrono::Utc::now())
                {
                    Ok(assertion) => tokens
                        .jwt_bearer(&assertion)
                        .await
                        .map(Credential::JwtBearer),
                    Err(e) => Err(e),
                };
                (AuthFlow::JwtBearer, result)
            }
        }
    }
}
