pub mod connector;
pub mod env;
pub mod loader;
pub mod types;

pub use connector::{ConnectorConfig, ConnectorConfigBuilder};
pub use loader::load_config;
pub use types::{
    AnnotatedConnectionConfig, ApiKeyPlacement, ConnectionConfig, ConnkitConfig,
    CredentialsConfig,
};
