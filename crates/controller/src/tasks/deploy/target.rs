//! Where a deployment request's runtime resources live.

use crate::crds::{DiscoveryConfig, Environment, RegistryDeployment};
use crate::store::{list_as, ResourceStore};
use crate::tasks::types::{Context, Error, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Store and namespace a request deploys into
#[derive(Clone)]
pub struct DeployTarget {
    pub store: Arc<dyn ResourceStore>,
    pub namespace: String,
    /// Environment name, `None` for the controller's own cluster
    pub environment: Option<String>,
    /// Cluster name recorded on managed resources
    pub cluster: Option<String>,
}

impl DeployTarget {
    /// Resources reached through the connector are polled, not watched
    pub fn is_remote(&self) -> bool {
        self.environment.is_some()
    }
}

/// Environment named `name` among the DiscoveryConfigs of `namespace`
pub async fn find_environment(ctx: &Context, namespace: &str, name: &str) -> Result<Option<Environment>> {
    let configs = list_as::<DiscoveryConfig>(ctx.store.as_ref(), Some(namespace)).await?;
    Ok(configs
        .into_iter()
        .flat_map(|c| c.spec.environments)
        .find(|e| e.name == name))
}

/// Resolve the target of a request.
///
/// An unknown environment is `NotFound` (it may be added later), one with
/// deployments disabled is a validation failure.
pub async fn resolve(ctx: &Context, request: &RegistryDeployment) -> Result<DeployTarget> {
    let namespace = request
        .spec
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty());

    let Some(env_name) = request.spec.environment.as_deref().filter(|e| !e.is_empty()) else {
        return Ok(DeployTarget {
            store: ctx.store.clone(),
            namespace: namespace.unwrap_or_else(|| ctx.config.deployment.default_namespace.clone()),
            environment: None,
            cluster: None,
        });
    };

    let request_ns = request.namespace().unwrap_or_else(|| ctx.namespace.clone());
    let Some(environment) = find_environment(ctx, &request_ns, env_name).await? else {
        return Err(Error::NotFound(format!(
            "environment {env_name:?} not found in any DiscoveryConfig in namespace {request_ns:?}"
        )));
    };
    if !environment.deploy_enabled {
        return Err(Error::Validation(format!(
            "deployment to environment {env_name:?} is not allowed (deployEnabled is false)"
        )));
    }

    let store = ctx.connector.connect(&environment).await?;
    debug!(environment = env_name, cluster = %environment.cluster.name, "Resolved deployment target");

    Ok(DeployTarget {
        store,
        namespace: namespace.unwrap_or_else(|| environment.deploy_namespace()),
        cluster: Some(environment.cluster.name.clone()).filter(|c| !c.is_empty()),
        environment: Some(environment.name),
    })
}
