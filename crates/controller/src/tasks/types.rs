use crate::connector::{ClusterConnector, ConnectorError};
use crate::store::{ResourceStore, StoreError};
use crate::tasks::config::ControllerConfig;
use std::sync::Arc;
use thiserror::Error;

pub const LABEL_PREFIX: &str = "agentregistry.dev/";
pub const FINALIZER: &str = "agentregistry.dev/finalizer";
pub const MANAGED_BY_VALUE: &str = "agentregistry";

pub const LABEL_DISCOVERED: &str = "agentregistry.dev/discovered";
pub const LABEL_SOURCE_KIND: &str = "agentregistry.dev/source-kind";
pub const LABEL_SOURCE_NAME: &str = "agentregistry.dev/source-name";
pub const LABEL_SOURCE_NAMESPACE: &str = "agentregistry.dev/source-namespace";
pub const LABEL_ENVIRONMENT: &str = "agentregistry.dev/environment";
pub const LABEL_CLUSTER: &str = "agentregistry.dev/cluster";
pub const LABEL_RESOURCE_UID: &str = "agentregistry.dev/resource-uid";
pub const LABEL_RESOURCE_NAME: &str = "agentregistry.dev/resource-name";
pub const LABEL_RESOURCE_VERSION: &str = "agentregistry.dev/resource-version";
pub const LABEL_RESOURCE_ENVIRONMENT: &str = "agentregistry.dev/resource-environment";
pub const LABEL_RESOURCE_SOURCE: &str = "agentregistry.dev/resource-source";
pub const LABEL_RESOURCE_TYPE: &str = "agentregistry.dev/resource-type";
pub const LABEL_SKILL_DISCOVERED: &str = "agentregistry.dev/skill-discovered";
pub const LABEL_SKILL_SOURCE: &str = "agentregistry.dev/skill-source";
pub const LABEL_AUTO_DEPLOY: &str = "agentregistry.dev/auto-deploy";
pub const LABEL_TARGET_ENVIRONMENT: &str = "agentregistry.dev/target-environment";
pub const LABEL_AUTO_CREATED: &str = "agentregistry.dev/auto-created";
pub const LABEL_RUNTIME: &str = "agentregistry.dev/runtime";
pub const LABEL_SOURCE: &str = "agentregistry.dev/source";
pub const LABEL_MANAGED_BY: &str = "agentregistry.dev/managed-by";
pub const LABEL_DEPLOYMENT_NAME: &str = "agentregistry.dev/deployment-name";
pub const LABEL_DEPLOYMENT_NAMESPACE: &str = "agentregistry.dev/deployment-namespace";

pub const ANNOTATION_CREATED_BY: &str = "agentregistry.dev/created-by";
pub const ANNOTATION_CATALOG_SOURCE: &str = "agentregistry.dev/catalog-source";
pub const ANNOTATION_SOURCE_COMMIT: &str = "agentregistry.dev/source-commit";
pub const ANNOTATION_SOURCE_PR: &str = "agentregistry.dev/source-pr";

#[derive(Debug, Error)]
pub enum Error {
    /// Environment unreachable or credential exchange failed
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectorError),

    /// Referenced record missing; retried with backoff
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency mismatch that outlived the retry limit
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed spec; not retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catalog spec cannot be mapped to a runtime resource; not retried
    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => Error::Conflict(e.to_string()),
            StoreError::Invalid(msg) => Error::Validation(msg),
            other => Error::Store(other),
        }
    }
}

impl Error {
    /// Local store connectivity loss, the only process-fatal condition
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::Store(StoreError::Unavailable(_)))
    }

    /// Retrying cannot help
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Translation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Dependencies handed to every reconciler
pub struct Context {
    /// Local cluster store (catalog, discovery configs, deployment requests)
    pub store: Arc<dyn ResourceStore>,
    pub connector: Arc<dyn ClusterConnector>,
    /// Controller namespace holding registry records
    pub namespace: String,
    pub config: Arc<ControllerConfig>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn ClusterConnector>,
        namespace: impl Into<String>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connector,
            namespace: namespace.into(),
            config: Arc::new(config),
        })
    }
}
