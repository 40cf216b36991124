//! Create-or-replace of runtime resources and their removal.

use super::target::DeployTarget;
use super::translate::RuntimeObject;
use crate::crds::kagent::RuntimeKind;
use crate::crds::ManagedResource;
use crate::store::{ObjectKey, ResourceStore, StoreError, CONFLICT_RETRY_ATTEMPTS};
use crate::tasks::types::{Error, Result, LABEL_DEPLOYMENT_NAME, LABEL_DEPLOYMENT_NAMESPACE};
use kube::core::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Request recorded in the deployment labels of a runtime object
pub fn owning_request(obj: &DynamicObject) -> Option<ObjectKey> {
    let labels = obj.labels();
    let name = labels.get(LABEL_DEPLOYMENT_NAME).filter(|n| !n.is_empty())?;
    let namespace = labels.get(LABEL_DEPLOYMENT_NAMESPACE).map(String::as_str);
    Some(ObjectKey::new(namespace, name))
}

/// Write `runtime` to the target, replacing whatever is there unless another
/// request owns it.
///
/// Conditional on the observed `resourceVersion`; conflicts and create races
/// re-read and try again.
pub async fn apply(target: &DeployTarget, runtime: &RuntimeObject) -> Result<ManagedResource> {
    let ar = runtime.kind.api_resource();
    let store = target.store.as_ref();
    let name = runtime.name();
    let namespace = runtime.object.namespace();
    let owner = owning_request(&runtime.object);

    for attempt in 1..=CONFLICT_RETRY_ATTEMPTS {
        let existing = store.get(&ar, namespace.as_deref(), &name).await?;
        if let Some(other) = existing.as_ref().and_then(owning_request).filter(|o| Some(o) != owner.as_ref()) {
            return Err(Error::Conflict(format!(
                "{} {name} is owned by deployment {other}",
                runtime.kind.kind()
            )));
        }
        let written = match existing {
            None => store.create(&ar, &runtime.object).await.map(|_| "created"),
            Some(existing) if up_to_date(&existing, &runtime.object) => Ok("unchanged"),
            Some(existing) => {
                let mut desired = runtime.object.clone();
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                desired.metadata.finalizers = existing.metadata.finalizers.clone();
                let mut labels = existing.labels().clone();
                labels.extend(desired.labels().clone());
                desired.metadata.labels = Some(labels);
                store.replace(&ar, &desired).await.map(|_| "replaced")
            }
        };
        match written {
            Ok(outcome) => {
                if outcome != "unchanged" {
                    info!(kind = runtime.kind.kind(), name = %name, namespace = ?namespace, outcome, "📦 Applied runtime resource");
                }
                return Ok(managed_resource(runtime, target));
            }
            Err(StoreError::AlreadyExists { .. }) | Err(StoreError::Conflict { .. }) => {
                debug!(kind = runtime.kind.kind(), name = %name, attempt, "Concurrent write, re-reading runtime resource");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Conflict(format!(
        "{} {name} kept changing while being applied",
        runtime.kind.kind()
    )))
}

/// Spec and our labels already match
fn up_to_date(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    let labels = existing.labels();
    existing.data.get("spec") == desired.data.get("spec")
        && desired
            .labels()
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
}

fn managed_resource(runtime: &RuntimeObject, target: &DeployTarget) -> ManagedResource {
    let ar = runtime.kind.api_resource();
    ManagedResource {
        api_version: ar.api_version,
        kind: ar.kind,
        name: runtime.name(),
        namespace: runtime.object.namespace(),
        cluster: target.cluster.clone(),
    }
}

/// Delete one managed resource of `owner`; already gone, or taken over by
/// another request, counts as success
pub async fn delete(store: &dyn ResourceStore, owner: &ObjectKey, resource: &ManagedResource) -> Result<()> {
    let Some(kind) = RuntimeKind::from_kind(&resource.kind) else {
        return Err(Error::Validation(format!("unknown managed resource kind {}", resource.kind)));
    };
    let ar = kind.api_resource();
    let namespace = resource.namespace.as_deref();
    let Some(existing) = store.get(&ar, namespace, &resource.name).await? else {
        return Ok(());
    };
    if let Some(other) = owning_request(&existing).filter(|o| o != owner) {
        warn!(kind = %resource.kind, name = %resource.name, owner = %other, "Runtime resource belongs to another deployment, leaving it");
        return Ok(());
    }
    match store.delete(&ar, namespace, &resource.name).await {
        Ok(()) => {
            info!(kind = %resource.kind, name = %resource.name, namespace = ?resource.namespace, "🗑️ Deleted runtime resource");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete every resource, logging failures; returns how many could not be deleted
pub async fn delete_all(store: &dyn ResourceStore, owner: &ObjectKey, resources: &[ManagedResource]) -> usize {
    let mut failed = 0;
    for resource in resources {
        if let Err(e) = delete(store, owner, resource).await {
            warn!(kind = %resource.kind, name = %resource.name, error = %e, "Failed to delete managed resource");
            failed += 1;
        }
    }
    failed
}
