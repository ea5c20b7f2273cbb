use crate::args::suggest_name;
use crate::auth::cache::{load_cached_token, save_token};
use crate::auth::Credential;
use crate::config::{ConnectorConfig, ConnkitConfig, CredentialsConfig};
use crate::connector::Connector;
use crate::error::ConnectorError;

/// Look up `name` in the merged config, suggesting a close match when it is
/// missing.
pub fn resolve_connection(
    name: &str,
    config: &ConnkitConfig,
) -> Result<ConnectorConfig, ConnectorError> {
    let Some(conn) = config.connections.get(name) else {
        let known: Vec<&str> = config.connections.keys().map(String::as_str).collect();
        if let Some(suggestion) = suggest_name(name, &known) {
            eprintln!("Did you mean '{suggestion}'?");
        }
        return Err(ConnectorError::ConnectionNotFound(name.to_string()));
    };
    ConnectorConfig::from_connection(name, conn)
}

/// Build the connector for `name`, seeding an OAuth connection with the token
/// saved by a previous `connkit auth`.
pub fn open_connector(name: &str, config: &ConnkitConfig) -> Result<Connector, ConnectorError> {
    open_connector_at(name, config, None)
}

/// Like [`open_connector`], with the bulk job endpoint moved to
/// `bulk_base_path` when given.
pub fn open_connector_at(
    name: &str,
    config: &ConnkitConfig,
    bulk_base_path: Option<&str>,
) -> Result<Connector, ConnectorError> {
    let mut builder = Connector::builder(resolve_connection(name, config)?);
    if let Some(path) = bulk_base_path {
        builder = builder.bulk_base_path(path);
    }
    let connector = builder.build()?;
    if matches!(connector.config().credentials, CredentialsConfig::Oauth { .. }) {
        if let Some(token) = load_cached_token(name) {
            tracing::debug!(connection = name, "Seeding cached token");
            connector.auth().seed(token);
        }
    }
    Ok(connector)
}

/// Write the connector's current OAuth token back to the on-disk cache so a
/// refresh performed during this run survives it.
pub fn persist_token(connector: &Connector) {
    if !matches!(connector.config().credentials, CredentialsConfig::Oauth { .. }) {
        return;
    }
    if let Some(Credential::OAuth(token)) = connector.auth().store().current() {
        if let Err(e) = save_token(&connector.config().name, &token) {
            tracing::warn!("Could not save token cache: {e}");
        }
    }
}
