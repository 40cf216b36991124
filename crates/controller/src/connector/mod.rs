//! Per-environment cluster access.
//!
//! Resolves an [`Environment`] to a [`ResourceStore`] for the cluster it
//! names. Remote handles are cached by environment name and rebuilt when the
//! cluster configuration fingerprint changes or the cache TTL lapses.

use crate::crds::Environment;
use crate::store::{KubeStore, ResourceStore, StoreError};
use crate::tasks::config::{ConnectorSettings, CredentialMode};
use async_trait::async_trait;
use dashmap::DashMap;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

pub mod gke;
pub mod static_config;

pub use gke::GkeCredentials;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("environment {environment}: {message}")]
    InvalidConfig { environment: String, message: String },

    #[error("environment {environment}: credential exchange failed: {message}")]
    Credentials { environment: String, message: String },

    #[error("environment {environment}: timed out after {seconds}s")]
    Timeout { environment: String, seconds: u64 },

    #[error("environment {environment}: failed to build client: {message}")]
    Client { environment: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("local store error: {0}")]
    Store(#[from] StoreError),
}

impl ConnectorError {
    pub(crate) fn invalid(environment: &str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            environment: environment.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn credentials(environment: &str, message: impl Into<String>) -> Self {
        Self::Credentials {
            environment: environment.to_string(),
            message: message.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Store for the environment's cluster; the local store for local ones
    async fn connect(&self, environment: &Environment) -> Result<Arc<dyn ResourceStore>, ConnectorError>;

    /// Drop any cached handle for the named environment
    fn invalidate(&self, environment: &str);
}

/// Endpoint, CA bundle and bearer token for a remote API server
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterCredentials {
    pub endpoint: String,
    /// Base64-encoded PEM bundle
    pub ca_data: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("endpoint", &self.endpoint)
            .field("ca_data", &self.ca_data.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How a remote environment authenticates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Static,
    Gke,
}

struct CachedStore {
    fingerprint: String,
    store: Arc<dyn ResourceStore>,
    created_at: Instant,
}

pub struct EnvironmentConnector {
    local: Arc<dyn ResourceStore>,
    /// Namespace holding token secrets for static environments
    namespace: String,
    settings: ConnectorSettings,
    gke: GkeCredentials,
    cache: DashMap<String, CachedStore>,
}

impl EnvironmentConnector {
    pub fn new(
        local: Arc<dyn ResourceStore>,
        namespace: impl Into<String>,
        settings: ConnectorSettings,
    ) -> Result<Self, ConnectorError> {
        let gke = GkeCredentials::new(&settings)?;
        Ok(Self {
            local,
            namespace: namespace.into(),
            settings,
            gke,
            cache: DashMap::new(),
        })
    }

    pub fn cached_environments(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, environment: &str, fingerprint: &str) -> Option<Arc<dyn ResourceStore>> {
        let entry = self.cache.get(environment)?;
        if entry.fingerprint == fingerprint && entry.created_at.elapsed() < self.settings.cache_ttl() {
            return Some(entry.store.clone());
        }
        drop(entry);
        self.cache.remove(environment);
        None
    }

    async fn resolve_credentials(&self, environment: &Environment) -> Result<ClusterCredentials, ConnectorError> {
        match auth_method(environment, self.settings.credential_mode)? {
            AuthMethod::Static => {
                static_config::resolve(environment, self.local.as_ref(), &self.namespace).await
            }
            AuthMethod::Gke => self.gke.resolve(environment).await,
        }
    }
}

#[async_trait]
impl ClusterConnector for EnvironmentConnector {
    async fn connect(&self, environment: &Environment) -> Result<Arc<dyn ResourceStore>, ConnectorError> {
        if is_local(environment) {
            debug!(environment = %environment.name, "Using local cluster store");
            return Ok(self.local.clone());
        }

        let fingerprint = fingerprint(environment);
        if let Some(store) = self.cached(&environment.name, &fingerprint) {
            debug!(environment = %environment.name, "Using cached cluster store");
            return Ok(store);
        }

        let timeout = self.settings.request_timeout();
        let credentials = tokio::time::timeout(timeout, self.resolve_credentials(environment))
            .await
            .map_err(|_| ConnectorError::Timeout {
                environment: environment.name.clone(),
                seconds: timeout.as_secs(),
            })??;
        let client = build_client(&environment.name, &credentials).await?;
        let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::direct(client));

        self.cache.insert(
            environment.name.clone(),
            CachedStore {
                fingerprint,
                store: store.clone(),
                created_at: Instant::now(),
            },
        );
        info!(
            environment = %environment.name,
            cluster = %environment.cluster.name,
            endpoint = %credentials.endpoint,
            "🔗 Connected to remote cluster"
        );
        Ok(store)
    }

    fn invalidate(&self, environment: &str) {
        if self.cache.remove(environment).is_some() {
            debug!(environment, "Invalidated cached cluster store");
        }
    }
}

/// The environment refers to the cluster the controller runs in
pub fn is_local(environment: &Environment) -> bool {
    let cluster = &environment.cluster;
    let name = cluster.name.as_str();
    if name.is_empty() || name == "local" {
        return true;
    }
    if cluster.endpoint.as_deref().unwrap_or_default().is_empty() && !cluster.use_workload_identity {
        let provider = environment.provider();
        let has_project = !cluster.project_id.as_deref().unwrap_or_default().is_empty();
        return provider.is_empty() || (provider == "gcp" && !has_project);
    }
    false
}

/// Pick the credential path for a remote environment
pub fn auth_method(environment: &Environment, mode: CredentialMode) -> Result<AuthMethod, ConnectorError> {
    let cluster = &environment.cluster;
    let has_static = !cluster.endpoint.as_deref().unwrap_or_default().is_empty()
        && !cluster.ca_data.as_deref().unwrap_or_default().is_empty();
    let has_project = !cluster.project_id.as_deref().unwrap_or_default().is_empty();
    let workload_identity = cluster.use_workload_identity;

    let method = if has_static {
        AuthMethod::Static
    } else if workload_identity && (environment.provider() == "gcp" || has_project) {
        AuthMethod::Gke
    } else if workload_identity {
        return Err(ConnectorError::invalid(
            &environment.name,
            "unable to determine provider for workload identity; set provider or projectId",
        ));
    } else {
        return Err(ConnectorError::invalid(
            &environment.name,
            "no valid authentication method: need endpoint and caData, or workload identity",
        ));
    };

    match (mode, method) {
        (CredentialMode::Static, AuthMethod::Gke) => Err(ConnectorError::invalid(
            &environment.name,
            "workload identity is disabled by the controller credential mode",
        )),
        (CredentialMode::WorkloadIdentity, AuthMethod::Static) => Err(ConnectorError::invalid(
            &environment.name,
            "static credentials are disabled by the controller credential mode",
        )),
        _ => Ok(method),
    }
}

/// Short hash over every cluster field that affects the connection
pub fn fingerprint(environment: &Environment) -> String {
    let cluster = &environment.cluster;
    let data = format!(
        "{}:{}:{}:{}:{}:{}:{}",
        cluster.name,
        cluster.endpoint.as_deref().unwrap_or_default(),
        cluster.ca_data.as_deref().unwrap_or_default(),
        cluster.project_id.as_deref().unwrap_or_default(),
        cluster.zone.as_deref().unwrap_or_default(),
        cluster.region.as_deref().unwrap_or_default(),
        cluster.use_workload_identity,
    );
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(&digest[..8])
}

/// `https://` unless a scheme is already present
pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Synthesize a single-context kubeconfig for the credentials
pub fn kubeconfig_for(environment: &str, credentials: &ClusterCredentials) -> Result<Kubeconfig, ConnectorError> {
    let mut cluster = json!({ "server": credentials.endpoint });
    if let Some(ca) = &credentials.ca_data {
        cluster["certificate-authority-data"] = json!(ca);
    }
    let mut user = json!({});
    if let Some(token) = &credentials.token {
        user["token"] = json!(token);
    }

    let raw = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": environment, "cluster": cluster }],
        "users": [{ "name": environment, "user": user }],
        "contexts": [{
            "name": environment,
            "context": { "cluster": environment, "user": environment }
        }],
        "current-context": environment,
    });
    serde_json::from_value(raw).map_err(|e| ConnectorError::Client {
        environment: environment.to_string(),
        message: format!("invalid kubeconfig: {e}"),
    })
}

async fn build_client(environment: &str, credentials: &ClusterCredentials) -> Result<Client, ConnectorError> {
    let client_error = |message: String| ConnectorError::Client {
        environment: environment.to_string(),
        message,
    };
    let kubeconfig = kubeconfig_for(environment, credentials)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| client_error(e.to_string()))?;
    Client::try_from(config).map_err(|e| client_error(e.to_string()))
}
