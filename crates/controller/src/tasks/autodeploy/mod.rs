//! Auto-deployment: turn an `auto-deploy=true` label on a catalog entry into a
//! `RegistryDeployment`.
//!
//! The request name is a pure function of (name, version, type) and creation is
//! a plain create that treats `AlreadyExists` as success, so any number of
//! concurrent evaluations of one entry leave exactly one request behind.

use crate::crds::{
    CatalogEntry, CatalogKind, DiscoveryConfig, ProvenanceSource, RegistryDeployment,
    RegistryDeploymentSpec, ResourceType,
};
use crate::store::{get_as, get_entry, list_as, to_dynamic, ObjectKey, StoreError};
use crate::tasks::naming::ResourceNaming;
use crate::tasks::queue::{Action, Reconciler};
use crate::tasks::types::{
    Context, Result, ANNOTATION_CATALOG_SOURCE, ANNOTATION_CREATED_BY, ANNOTATION_SOURCE_COMMIT,
    ANNOTATION_SOURCE_PR, LABEL_AUTO_CREATED, LABEL_AUTO_DEPLOY, LABEL_RESOURCE_NAME,
    LABEL_RESOURCE_TYPE, LABEL_RESOURCE_VERSION, LABEL_RUNTIME, LABEL_SOURCE, LABEL_TARGET_ENVIRONMENT,
};
use async_trait::async_trait;
use kube::core::ApiResource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const CREATED_BY: &str = "auto-deploy-evaluator";
pub const DEFAULT_RUNTIME: &str = "kubernetes";

/// Where an auto-created request deploys to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployTarget {
    /// Environment from a DiscoveryConfig; `None` deploys to the local cluster
    pub environment: Option<String>,
    pub namespace: String,
}

/// Why an entry was not turned into a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Skip {
    NotRequested,
    NotDeployableKind,
    AlreadyRequested,
    NothingToDeploy,
    NoTarget,
    TargetNotDeployable(String),
}

/// Outcome of one evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Evaluation {
    Created(String),
    /// Another evaluation created the same request first
    Exists(String),
    Skipped(Skip),
}

pub struct AutoDeployEvaluator {
    ctx: Arc<Context>,
    kind: CatalogKind,
}

impl AutoDeployEvaluator {
    pub fn new(ctx: Arc<Context>, kind: CatalogKind) -> Self {
        Self { ctx, kind }
    }

    /// Apply the eligibility policy to one entry and create its request
    pub async fn evaluate(&self, entry: &CatalogEntry) -> Result<Evaluation> {
        if entry.label(LABEL_AUTO_DEPLOY) != Some("true") {
            return Ok(Evaluation::Skipped(Skip::NotRequested));
        }
        let Some(resource_type) = ResourceType::for_catalog_kind(entry.kind()) else {
            return Ok(Evaluation::Skipped(Skip::NotDeployableKind));
        };

        let name = entry.spec.name();
        let version = entry.spec.version().unwrap_or_default();
        let request_name = ResourceNaming::deployment_name(name, version, resource_type);

        if get_as::<RegistryDeployment>(self.ctx.store.as_ref(), Some(&self.ctx.namespace), &request_name)
            .await?
            .is_some()
        {
            return Ok(Evaluation::Skipped(Skip::AlreadyRequested));
        }
        if !entry.spec.is_deployable() {
            return Ok(Evaluation::Skipped(Skip::NothingToDeploy));
        }
        let target = match self.resolve_target(entry).await? {
            Ok(target) => target,
            Err(skip) => return Ok(Evaluation::Skipped(skip)),
        };

        let request = build_request(entry, &request_name, resource_type, &target, &self.ctx.namespace);
        let ar = ApiResource::erase::<RegistryDeployment>(&());
        match self.ctx.store.create(&ar, &to_dynamic(&request)?).await {
            Ok(_) => {
                info!(
                    deployment = %request_name,
                    namespace = %target.namespace,
                    environment = target.environment.as_deref().unwrap_or("local"),
                    "🚀 Created deployment request from auto-deploy label"
                );
                Ok(Evaluation::Created(request_name))
            }
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(deployment = %request_name, "Deployment request created concurrently");
                Ok(Evaluation::Exists(request_name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Label, then discovery provenance, then the configured default
    async fn resolve_target(&self, entry: &CatalogEntry) -> Result<std::result::Result<DeployTarget, Skip>> {
        let candidate = entry
            .label(LABEL_TARGET_ENVIRONMENT)
            .map(str::to_string)
            .or_else(|| {
                entry
                    .status
                    .provenance
                    .as_ref()
                    .and_then(|p| p.environment.clone())
            })
            .or_else(|| self.ctx.config.auto_deploy.default_environment.clone())
            .filter(|name| !name.trim().is_empty());
        let Some(candidate) = candidate else {
            return Ok(Err(Skip::NoTarget));
        };

        let configs = list_as::<DiscoveryConfig>(self.ctx.store.as_ref(), Some(&self.ctx.namespace)).await?;
        let environment = configs
            .iter()
            .flat_map(|c| c.spec.environments.iter())
            .find(|e| e.name == candidate);

        Ok(match environment {
            Some(env) if env.deploy_enabled => Ok(DeployTarget {
                environment: Some(env.name.clone()),
                namespace: env.deploy_namespace(),
            }),
            Some(env) => Err(Skip::TargetNotDeployable(env.name.clone())),
            None => Ok(DeployTarget {
                environment: None,
                namespace: ResourceNaming::sanitize(&candidate),
            }),
        })
    }
}

/// `webhook` for ingested entries, `discovery` for discovered ones, else `manual`
fn request_source(entry: &CatalogEntry) -> &'static str {
    if entry.annotation(ANNOTATION_SOURCE_COMMIT).is_some() || entry.annotation(ANNOTATION_SOURCE_PR).is_some() {
        return "webhook";
    }
    match entry.status.provenance.as_ref().map(|p| p.source) {
        Some(ProvenanceSource::Discovery) => "discovery",
        _ => "manual",
    }
}

fn build_request(
    entry: &CatalogEntry,
    request_name: &str,
    resource_type: ResourceType,
    target: &DeployTarget,
    namespace: &str,
) -> RegistryDeployment {
    let name = entry.spec.name();
    let version = entry.spec.version().unwrap_or_default();

    let labels = BTreeMap::from([
        (LABEL_AUTO_CREATED.to_string(), "true".to_string()),
        (LABEL_RUNTIME.to_string(), DEFAULT_RUNTIME.to_string()),
        (LABEL_SOURCE.to_string(), request_source(entry).to_string()),
        (LABEL_RESOURCE_NAME.to_string(), ResourceNaming::label_value(name)),
        (LABEL_RESOURCE_VERSION.to_string(), ResourceNaming::label_value(version)),
        (LABEL_RESOURCE_TYPE.to_string(), resource_type.to_string()),
    ]);
    let mut annotations = BTreeMap::from([
        (ANNOTATION_CREATED_BY.to_string(), CREATED_BY.to_string()),
        (
            ANNOTATION_CATALOG_SOURCE.to_string(),
            format!("{}/{}", entry.kind().crd_kind(), entry.name_any()),
        ),
    ]);
    for key in [ANNOTATION_SOURCE_COMMIT, ANNOTATION_SOURCE_PR] {
        if let Some(value) = entry.annotation(key) {
            annotations.insert(key.to_string(), value.to_string());
        }
    }

    let mut request = RegistryDeployment::new(
        request_name,
        RegistryDeploymentSpec {
            resource_name: name.to_string(),
            version: version.to_string(),
            resource_type,
            runtime: DEFAULT_RUNTIME.to_string(),
            prefer_remote: false,
            config: BTreeMap::new(),
            namespace: Some(target.namespace.clone()),
            environment: target.environment.clone(),
        },
    );
    request.metadata.namespace = Some(namespace.to_string());
    request.metadata.labels = Some(labels);
    request.metadata.annotations = Some(annotations);
    request
}

#[async_trait]
impl Reconciler for AutoDeployEvaluator {
    fn name(&self) -> &'static str {
        match self.kind {
            CatalogKind::Agent => "agentcatalog-autodeploy",
            _ => "mcpservercatalog-autodeploy",
        }
    }

    #[instrument(skip(self), fields(kind = %self.kind, entry = %key.name))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        if !self.ctx.config.auto_deploy.enabled {
            return Ok(Action::await_change());
        }
        let namespace = key.namespace().unwrap_or(self.ctx.namespace.as_str());
        let Some(entry) = get_entry(self.ctx.store.as_ref(), self.kind, namespace, &key.name).await? else {
            return Ok(Action::await_change());
        };

        match self.evaluate(&entry).await? {
            Evaluation::Skipped(Skip::NothingToDeploy) => {
                warn!("auto-deploy requested but the entry has no package, image or remote");
            }
            Evaluation::Skipped(Skip::NoTarget) => {
                warn!("auto-deploy requested but no target environment could be resolved");
            }
            Evaluation::Skipped(Skip::TargetNotDeployable(environment)) => {
                warn!(%environment, "auto-deploy target environment does not allow deployments");
            }
            other => debug!(outcome = ?other, "Auto-deploy evaluated"),
        }
        Ok(Action::await_change())
    }
}
