use std::time::Duration;

use reqwest::Url;

use crate::auth::cache::save_token;
use crate::auth::callback::listen_for_callback;
use crate::auth::pkce::{generate_pkce, generate_state};
use crate::config::{load_config, CredentialsConfig};
use crate::connector::Connector;
use crate::error::ConnectorError;

use super::connection::resolve_connection;

/// Loopback port the callback listener binds, taken from the configured
/// redirect URI.
pub fn callback_port(redirect_uri: &str) -> Result<u16, ConnectorError> {
    let url = Url::parse(redirect_uri)
        .map_err(|e| ConnectorError::Validation(format!("Invalid redirectUri '{redirect_uri}': {e}")))?;
    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") | Some("[::1]") => {}
        _ => {
            return Err(ConnectorError::Validation(format!(
                "redirectUri '{redirect_uri}' must point at localhost for interactive login"
            )))
        }
    }
    url.port_or_known_default().ok_or_else(|| {
        ConnectorError::Validation(format!("redirectUri '{redirect_uri}' has no port"))
    })
}

/// Run the interactive authorization-code login and cache the resulting token.
pub async fn run_auth(
    connection: &str,
    timeout: Duration,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let config = load_config(config_path)?;
    let conn_config = resolve_connection(connection, &config)?;
    let CredentialsConfig::Oauth { ref redirect_uri, .. } = conn_config.credentials else {
        return Err(ConnectorError::Validation(format!(
            "Connection '{connection}' uses the {} flow; interactive login needs oauth",
            conn_config.credentials.flow_name()
        )));
    };
    let port = callback_port(redirect_uri)?;

    let connector = Connector::new(conn_config)?;
    let pkce = generate_pkce();
    let state = generate_state();
    let auth_url = connector.auth().authorization_url(&state, &pkce)?;

    if webbrowser::open(auth_url.as_str()).is_err() {
        tracing::warn!("Could not open browser automatically");
    }
    eprintln!("If the browser did not open, visit:\n{auth_url}");

    let code = listen_for_callback(port, &state, timeout).await?;
    let credential = connector
        .auth()
        .authorize_with_code(code, Some(pkce.code_verifier))
        .await?;

    if let Some(token) = credential.token() {
        save_token(connection, token)?;
        println!("Authentication successful for '{connection}'");
        match token.expires_at {
            Some(at) => println!("Token expires: {}", at.to_rfc3339()),
            None => println!("Token has no expiry"),
        }
    }
    Ok(())
}
