use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthManager;
use crate::bulk::BulkJobOrchestrator;
use crate::cache::Cache;
use crate::config::{ConnectorConfig, ConnkitConfig};
use crate::error::ConnectorError;
use crate::http::{HttpResponse, RequestPipeline, RequestSpec};
use crate::observer::{Observer, TracingObserver};
use crate::paginate::{PageConvention, Paginator};
use crate::transport::HttpTransport;
use crate::transports::ReqwestTransport;
use crate::webhook::WebhookVerifier;

/// Largest batch accepted by [`Connector::create_records`].
pub const MAX_RECORDS_PER_BATCH: usize = 200;

/// One configured connection: its auth manager, request pipeline, bulk
/// orchestrator and cache. The host owns the instance and passes it around.
pub struct Connector {
    config: Arc<ConnectorConfig>,
    auth: Arc<AuthManager>,
    pipeline: Arc<RequestPipeline>,
    bulk: BulkJobOrchestrator,
    cache: Cache,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

pub struct ConnectorBuilder {
    config: ConnectorConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    observer: Option<Arc<dyn Observer>>,
    cache: Option<Cache>,
    bulk_base_path: Option<String>,
}

impl ConnectorBuilder {
    /// Replace the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn bulk_base_path(mut self, path: &str) -> Self {
        self.bulk_base_path = Some(path.to_string());
        self
    }

    pub fn build(self) -> Result<Connector, ConnectorError> {
        let config = Arc::new(self.config);
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(&config.headers)?),
        };
        let observer: Arc<dyn Observer> = match self.observer {
            Some(o) => o,
            None => Arc::new(TracingObserver),
        };

        let auth = Arc::new(AuthManager::new(
            config.clone(),
            transport.clone(),
            observer.clone(),
        )?);
        let pipeline = Arc::new(RequestPipeline::new(
            config.clone(),
            transport,
            auth.clone(),
            observer,
        ));
        let mut bulk = BulkJobOrchestrator::new(pipeline.clone());
        if let Some(path) = self.bulk_base_path {
            bulk = bulk.with_base_path(&path);
        }

        tracing::debug!(
            connection = %config.name,
            flow = config.credentials.flow_name(),
            "Connector ready"
        );
        Ok(Connector {
            config,
            auth,
            pipeline,
            bulk,
            cache: self.cache.unwrap_or_default(),
        })
    }
}

impl Connector {
    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder {
        ConnectorBuilder {
            config,
            transport: None,
            observer: None,
            cache: None,
            bulk_base_path: None,
        }
    }

    pub fn new(config: ConnectorConfig) -> Result<Self, ConnectorError> {
        Self::builder(config).build()
    }

    /// Build the connector for connection `name` of a loaded config file.
    pub fn from_config(config: &ConnkitConfig, name: &str) -> Result<Self, ConnectorError> {
        let conn = config
            .connections
            .get(name)
            .ok_or_else(|| ConnectorError::ConnectionNotFound(name.to_string()))?;
        Self::new(ConnectorConfig::from_connection(name, conn)?)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn bulk(&self) -> &BulkJobOrchestrator {
        &self.bulk
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn paginator(&self, convention: PageConvention) -> Paginator<'_> {
        Paginator::new(&self.pipeline, convention)
    }

    pub fn webhook_verifier(&self) -> Result<WebhookVerifier, ConnectorError> {
        self.config
            .webhook_secret
            .as_deref()
            .map(WebhookVerifier::new)
            .ok_or_else(|| {
                ConnectorError::Validation(format!(
                    "Connection '{}' has no webhookSecret configured",
                    self.config.name
                ))
            })
    }

    pub async fn execute(&self, spec: &RequestSpec) -> Result<HttpResponse, ConnectorError> {
        self.pipeline.execute(spec).await
    }

    pub async fn execute_cancellable(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ConnectorError> {
        self.pipeline.execute_cancellable(spec, cancel).await
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ConnectorError> {
        self.pipeline.execute_json(&RequestSpec::get(path)).await
    }

    /// `GET path` through the cache; `ttl = None` keeps the entry until
    /// invalidated.
    pub async fn cached_get_json(
        &self,
        path: &str,
        ttl: Option<Duration>,
    ) -> Result<Value, ConnectorError> {
        let key = format!("{}:GET {path}", self.config.name);
        self.cache
            .get_or_fetch(&key, || self.get_json(path), ttl)
            .await
    }

    /// Create up to [`MAX_RECORDS_PER_BATCH`] records in one call, posting
    /// `{"records": [...]}` to `path`.
    pub async fn create_records(
        &self,
        path: &str,
        records: &[Value],
    ) -> Result<Value, ConnectorError> {
        if records.is_empty() {
            return Err(ConnectorError::Validation(
                "At least one record is required".into(),
            ));
        }
        if records.len() > MAX_RECORDS_PER_BATCH {
            return Err(ConnectorError::Validation(format!(
                "{} records exceeds the batch limit of {MAX_RECORDS_PER_BATCH}",
                records.len()
            )));
        }
        let spec = RequestSpec::post(path).json(json!({ "records": records }));
        self.pipeline.execute_json(&spec).await
    }
}
