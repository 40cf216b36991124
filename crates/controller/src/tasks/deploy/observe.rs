//! Readiness of managed runtime resources, and its reflection onto the
//! catalog entry.

use crate::crds::kagent::{self, RuntimeKind};
use crate::crds::{CatalogKind, Condition, DeploymentSummary, ManagedResource};
use crate::store::{update_entry_status, ResourceStore};
use crate::tasks::types::{Context, Result};
use tracing::debug;

pub const PENDING: &str = "Pending";

/// Ready only when every managed resource reports `Ready=True`; otherwise the
/// first reason found
pub async fn readiness(store: &dyn ResourceStore, resources: &[ManagedResource]) -> (bool, String) {
    if resources.is_empty() {
        return (false, PENDING.to_string());
    }
    for resource in resources {
        let describe = || {
            format!(
                "{} {}/{}",
                resource.kind,
                resource.namespace.as_deref().unwrap_or_default(),
                resource.name
            )
        };
        let Some(kind) = RuntimeKind::from_kind(&resource.kind) else {
            return (false, format!("Unknown managed kind {}", describe()));
        };
        let obj = match store
            .get(&kind.api_resource(), resource.namespace.as_deref(), &resource.name)
            .await
        {
            Ok(Some(obj)) => obj,
            Ok(None) => return (false, format!("Managed {} not found - will recreate", describe())),
            Err(e) => return (false, format!("Error checking {}: {e}", describe())),
        };
        let conditions: Vec<Condition> = obj
            .data
            .get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();
        let has_ready = conditions.iter().any(|c| c.condition_type == "Ready");
        match kagent::readiness(&conditions) {
            (true, _) => continue,
            (false, Some(message)) if has_ready => return (false, message),
            _ => return (false, PENDING.to_string()),
        }
    }
    (true, String::new())
}

/// Mirror a deployment observation onto the entry's `status.deployment`.
///
/// The entry may be gone or renamed; that is not an error for the request.
pub async fn mirror_to_catalog(
    ctx: &Context,
    kind: CatalogKind,
    entry_name: &str,
    summary: DeploymentSummary,
) -> Result<()> {
    let result = update_entry_status(ctx.store.as_ref(), kind, &ctx.namespace, entry_name, |entry| {
        let unchanged = entry
            .status
            .deployment
            .as_ref()
            .is_some_and(|current| current.same_observation(&summary));
        if unchanged {
            return false;
        }
        entry.status.deployment = Some(summary.clone());
        true
    })
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(entry = entry_name, "Catalog entry gone, deployment status not mirrored");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
