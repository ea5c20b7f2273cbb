pub mod args;
pub mod auth;
pub mod bulk;
pub mod cache;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod http;
pub mod observer;
pub mod paginate;
pub mod transport;
pub mod transports;
pub mod webhook;

pub use auth::{AuthManager, Credential, TokenData};
pub use bulk::{BulkJob, BulkJobOrchestrator, BulkOperation, JobOptions, JobState, ResultKind};
pub use cache::{Cache, FileStore, PersistentStore};
pub use config::{load_config, ConnectionConfig, ConnectorConfig, ConnkitConfig, CredentialsConfig};
pub use connector::{Connector, ConnectorBuilder};
pub use error::ConnectorError;
pub use http::{HttpResponse, RequestPipeline, RequestSpec, RetryPolicy};
pub use observer::{Observer, TracingObserver};
pub use paginate::{Cursor, PageConvention, PageResult, Paginator};
pub use transport::HttpTransport;
pub use transports::ReqwestTransport;
pub use webhook::{WebhookEnvelope, WebhookVerifier};

/// One-shot convenience function: load config, issue `GET path` on the named
/// connection, and return the decoded JSON body.
pub async fn get_once(connection: &str, path: &str) -> Result<serde_json::Value, ConnectorError> {
    let config = load_config(None)?;
    let connector = Connector::from_config(&config, connection)?;
    connector.get_json(path).await
}
