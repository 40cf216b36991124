//! Deploy and undeploy commands issued by collaborators.

use super::{ApiError, ApiResult};
use crate::crds::{DeploymentSummary, RegistryDeployment, RegistryDeploymentSpec};
use crate::store::{
    from_dynamic, get_as, list_entries, modify_with_retry, to_dynamic, ResourceStore, StoreError,
    WriteTarget,
};
use crate::tasks::naming::ResourceNaming;
use crate::tasks::types::{LABEL_RUNTIME, LABEL_SOURCE};
use kube::core::ApiResource;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// A request together with what the catalog shows for it
#[derive(Clone, Debug)]
pub struct DeploymentView {
    pub request: RegistryDeployment,
    pub catalog: Option<DeploymentSummary>,
}

#[derive(Clone)]
pub struct DeploymentApi {
    store: Arc<dyn ResourceStore>,
    namespace: String,
}

impl DeploymentApi {
    pub fn new(store: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn ar() -> ApiResource {
        ApiResource::erase::<RegistryDeployment>(&())
    }

    /// Create the request for (name, version, type) unless one exists.
    ///
    /// Returns the stored request and whether this call created it.
    pub async fn create(&self, spec: RegistryDeploymentSpec) -> ApiResult<(RegistryDeployment, bool)> {
        if spec.resource_name.trim().is_empty() || spec.version.trim().is_empty() {
            return Err(ApiError::Invalid("resourceName and version are required".to_string()));
        }
        let name = ResourceNaming::deployment_name(&spec.resource_name, &spec.version, spec.resource_type);
        let mut request = RegistryDeployment::new(&name, spec);
        request.metadata.namespace = Some(self.namespace.clone());
        let labels = request.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(LABEL_SOURCE.to_string(), "manual".to_string());
        labels.insert(
            LABEL_RUNTIME.to_string(),
            ResourceNaming::label_value(&request.spec.runtime),
        );

        match self.store.create(&Self::ar(), &to_dynamic(&request)?).await {
            Ok(created) => {
                info!(deployment = %name, namespace = %self.namespace, "🚀 Deployment requested");
                Ok((from_dynamic(created)?, true))
            }
            Err(StoreError::AlreadyExists { .. }) => {
                let existing = get_as::<RegistryDeployment>(self.store.as_ref(), Some(&self.namespace), &name)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("RegistryDeployment {name}")))?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge `patch` into `spec.config`.
    ///
    /// String values set keys and `null` removes them; keys not named are kept.
    pub async fn update_deployment_config(&self, name: &str, patch: &Value) -> ApiResult<RegistryDeployment> {
        let Some(patch) = patch.as_object() else {
            return Err(ApiError::Invalid("config patch must be a JSON object".to_string()));
        };
        if let Some((key, _)) = patch.iter().find(|(_, v)| !(v.is_string() || v.is_null())) {
            return Err(ApiError::Invalid(format!("config value for {key} must be a string or null")));
        }

        let result = modify_with_retry(
            self.store.as_ref(),
            &Self::ar(),
            Some(&self.namespace),
            name,
            WriteTarget::Object,
            |obj| {
                let spec = obj
                    .data
                    .get_mut("spec")
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| StoreError::Invalid(format!("RegistryDeployment {name} has no spec")))?;
                let config = spec
                    .entry("config")
                    .or_insert_with(|| Value::Object(Default::default()));
                if config.is_null() {
                    *config = Value::Object(Default::default());
                }
                let Some(config) = config.as_object_mut() else {
                    return Err(StoreError::Invalid(format!("RegistryDeployment {name} has a malformed config")));
                };
                let mut changed = false;
                for (key, value) in patch {
                    if value.is_null() {
                        changed |= config.remove(key).is_some();
                    } else if config.get(key) != Some(value) {
                        config.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                Ok(changed)
            },
        )
        .await;

        match result {
            Ok(obj) => {
                info!(deployment = %name, keys = patch.len(), "Deployment config patched");
                Ok(from_dynamic(obj)?)
            }
            Err(e) if e.is_not_found() => Err(ApiError::NotFound(format!("RegistryDeployment {name}"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Undeploy. The runtime resources go away once the controller has
    /// processed the deletion.
    pub async fn delete(&self, name: &str) -> ApiResult<bool> {
        match self.store.delete(&Self::ar(), Some(&self.namespace), name).await {
            Ok(()) => {
                info!(deployment = %name, "Undeploy requested");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, name: &str) -> ApiResult<Option<DeploymentView>> {
        let Some(request) = get_as::<RegistryDeployment>(self.store.as_ref(), Some(&self.namespace), name).await?
        else {
            return Ok(None);
        };
        let kind = request.spec.resource_type.catalog_kind();
        let catalog = list_entries(self.store.as_ref(), kind, Some(&self.namespace))
            .await?
            .into_iter()
            .find(|e| {
                e.spec.name() == request.spec.resource_name
                    && e.spec.version() == Some(request.spec.version.as_str())
            })
            .and_then(|e| e.status.deployment);
        Ok(Some(DeploymentView { request, catalog }))
    }
}
