//! Deployment reconciler: realize `RegistryDeployment` requests as kagent
//! runtime resources and report their readiness.

pub mod apply;
pub mod observe;
pub mod target;
pub mod translate;

use crate::crds::{
    set_condition, CatalogEntry, CatalogKind, DeploymentPhase, DeploymentSummary, ManagedResource,
    ManagementType, RegistryDeployment, RegistryDeploymentStatus,
};
use crate::store::{
    from_dynamic, get_as, list_entries, modify_with_retry, update_entry_status, ObjectKey, StoreEvent,
    WriteTarget,
};
use crate::crds::kagent::RuntimeKind;
use crate::tasks::queue::{Action, KeyMapper, Predicate, Reconciler, Runner};
use crate::tasks::types::{
    Context, Result, FINALIZER, LABEL_DEPLOYMENT_NAME, LABEL_DEPLOYMENT_NAMESPACE, LABEL_MANAGED_BY,
    MANAGED_BY_VALUE,
};
use async_trait::async_trait;
use kube::core::ApiResource;
use kube::ResourceExt;
use std::sync::Arc;
use target::DeployTarget;
use tracing::{debug, error, info, instrument, warn};

pub const CONDITION_READY: &str = "Ready";

pub const REASON_CATALOG_NOT_FOUND: &str = "CatalogNotFound";
pub const REASON_VALIDATION: &str = "ValidationError";
pub const REASON_TRANSLATION: &str = "TranslationError";
pub const REASON_TARGET_UNAVAILABLE: &str = "TargetUnavailable";
pub const REASON_APPLY_FAILED: &str = "ApplyFailed";

/// Request to enqueue for a change to a runtime resource we manage
pub fn owner_of(event: &StoreEvent) -> Vec<ObjectKey> {
    if event.labels.get(LABEL_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY_VALUE) {
        return Vec::new();
    }
    let Some(name) = event.labels.get(LABEL_DEPLOYMENT_NAME).filter(|n| !n.is_empty()) else {
        return Vec::new();
    };
    let namespace = event.labels.get(LABEL_DEPLOYMENT_NAMESPACE).map(String::as_str);
    vec![ObjectKey::new(namespace, name)]
}

/// Runner for deployment requests.
///
/// Only spec changes and deletions of a request wake it directly; its own
/// status writes must not cut a resolve backoff short. Changes to the runtime
/// resources a request owns wake it through [`owner_of`].
pub fn runner(ctx: Arc<Context>) -> Runner<DeploymentReconciler> {
    let owner: KeyMapper = Arc::new(owner_of);
    let mut runner = Runner::new(
        Arc::new(DeploymentReconciler::new(ctx.clone())),
        ctx.store.clone(),
        ApiResource::erase::<RegistryDeployment>(&()),
    )
    .predicate(Predicate::GenerationChanged)
    .concurrency(ctx.config.deployment.concurrency)
    .settings(ctx.config.runtime.clone());
    for kind in [
        RuntimeKind::McpServer,
        RuntimeKind::RemoteMcpServer,
        RuntimeKind::Agent,
    ] {
        runner = runner.watches(kind.api_resource(), owner.clone());
    }
    runner
}

fn request_key(request: &RegistryDeployment) -> ObjectKey {
    ObjectKey::new(request.namespace().as_deref(), &request.name_any())
}

pub struct DeploymentReconciler {
    ctx: Arc<Context>,
}

impl DeploymentReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Catalog entry matching (kind, spec.name, version) in the controller namespace
    async fn resolve_entry(&self, request: &RegistryDeployment) -> Result<Option<CatalogEntry>> {
        let kind = request.spec.resource_type.catalog_kind();
        let entries = list_entries(self.ctx.store.as_ref(), kind, Some(&self.ctx.namespace)).await?;
        Ok(entries.into_iter().find(|entry| {
            entry.spec.name() == request.spec.resource_name
                && entry.spec.version() == Some(request.spec.version.as_str())
        }))
    }

    async fn ensure_finalizer(&self, request: &RegistryDeployment) -> Result<RegistryDeployment> {
        if request.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(request.clone());
        }
        let ar = ApiResource::erase::<RegistryDeployment>(&());
        let obj = modify_with_retry(
            self.ctx.store.as_ref(),
            &ar,
            request.namespace().as_deref(),
            &request.name_any(),
            WriteTarget::Object,
            |obj| {
                let finalizers = obj.metadata.finalizers.get_or_insert_with(Vec::new);
                if finalizers.iter().any(|f| f == FINALIZER) {
                    return Ok(false);
                }
                finalizers.push(FINALIZER.to_string());
                Ok(true)
            },
        )
        .await?;
        Ok(from_dynamic(obj)?)
    }

    async fn remove_finalizer(&self, request: &RegistryDeployment) -> Result<()> {
        let ar = ApiResource::erase::<RegistryDeployment>(&());
        let result = modify_with_retry(
            self.ctx.store.as_ref(),
            &ar,
            request.namespace().as_deref(),
            &request.name_any(),
            WriteTarget::Object,
            |obj| {
                let Some(finalizers) = obj.metadata.finalizers.as_mut() else {
                    return Ok(false);
                };
                let before = finalizers.len();
                finalizers.retain(|f| f != FINALIZER);
                Ok(finalizers.len() != before)
            },
        )
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write status unless only timestamps would change
    async fn write_status(&self, request: &RegistryDeployment, status: &RegistryDeploymentStatus) -> Result<()> {
        if request
            .status
            .as_ref()
            .is_some_and(|current| current.same_state(status))
        {
            debug!("Deployment status unchanged, skipping update");
            return Ok(());
        }
        let ar = ApiResource::erase::<RegistryDeployment>(&());
        let value = serde_json::to_value(status)?;
        modify_with_retry(
            self.ctx.store.as_ref(),
            &ar,
            request.namespace().as_deref(),
            &request.name_any(),
            WriteTarget::Status,
            |obj| {
                obj.data["status"] = value.clone();
                Ok(true)
            },
        )
        .await?;
        Ok(())
    }

    async fn mark_managed(&self, entry: &CatalogEntry) -> Result<()> {
        if entry.status.management_type == Some(ManagementType::Managed) {
            return Ok(());
        }
        update_entry_status(
            self.ctx.store.as_ref(),
            entry.kind(),
            &self.ctx.namespace,
            &entry.name_any(),
            |e| {
                if e.status.management_type == Some(ManagementType::Managed) {
                    return false;
                }
                e.status.management_type = Some(ManagementType::Managed);
                true
            },
        )
        .await?;
        Ok(())
    }

    /// Terminal failure: remove what was deployed and stop until the request spec changes
    async fn fail(
        &self,
        request: &RegistryDeployment,
        mut status: RegistryDeploymentStatus,
        entry: Option<&CatalogEntry>,
        reason: &str,
        message: String,
    ) -> Result<Action> {
        error!(%reason, %message, "❌ Deployment failed");
        let mut cleanup_pending = false;
        if !status.managed_resources.is_empty() {
            let store = match target::resolve(&self.ctx, request).await {
                Ok(target) => target.store,
                Err(_) => self.ctx.store.clone(),
            };
            let owner = request_key(request);
            cleanup_pending = apply::delete_all(store.as_ref(), &owner, &status.managed_resources).await > 0;
            if !cleanup_pending {
                status.managed_resources.clear();
            }
        }

        status.phase = DeploymentPhase::Failed;
        status.ready = false;
        status.reason = Some(reason.to_string());
        status.message = Some(message.clone());
        status.updated_at = Some(chrono::Utc::now().to_rfc3339());
        set_condition(&mut status.conditions, CONDITION_READY, false, reason, message.clone());
        self.write_status(request, &status).await?;

        if let Some(entry) = entry {
            let summary = DeploymentSummary {
                ready: false,
                namespace: status.namespace.clone(),
                message: Some(message),
                last_checked: status.updated_at.clone(),
                ..DeploymentSummary::default()
            };
            observe::mirror_to_catalog(&self.ctx, entry.kind(), &entry.name_any(), summary).await?;
        }
        if cleanup_pending {
            warn!("Some runtime resources of the failed deployment could not be deleted, retrying");
            return Ok(Action::requeue(self.ctx.config.deployment.observe_interval()));
        }
        Ok(Action::await_change())
    }

    /// Keep deleting what a failed request left behind until nothing remains
    async fn retry_cleanup(&self, request: &RegistryDeployment, mut status: RegistryDeploymentStatus) -> Result<Action> {
        let store = match target::resolve(&self.ctx, request).await {
            Ok(target) => target.store,
            Err(_) => self.ctx.store.clone(),
        };
        let failed = apply::delete_all(store.as_ref(), &request_key(request), &status.managed_resources).await;
        if failed > 0 {
            warn!(failed, "Runtime resources of failed deployment still present, retrying");
            return Ok(Action::requeue(self.ctx.config.deployment.observe_interval()));
        }
        info!("Runtime resources of failed deployment removed");
        status.managed_resources.clear();
        self.write_status(request, &status).await?;
        Ok(Action::await_change())
    }

    fn failed_terminally(&self, status: &RegistryDeploymentStatus) -> bool {
        if status.phase != DeploymentPhase::Failed {
            return false;
        }
        match status.reason.as_deref() {
            Some(REASON_VALIDATION) | Some(REASON_TRANSLATION) => true,
            Some(REASON_CATALOG_NOT_FOUND) => {
                status.resolve_attempts >= self.ctx.config.deployment.max_resolve_attempts
            }
            _ => false,
        }
    }

    /// Resolving through Observing for a live request
    async fn deploy(&self, request: &RegistryDeployment) -> Result<Action> {
        let settings = &self.ctx.config.deployment;
        let previous = request.status.clone().unwrap_or_default();
        let spec_changed = previous.observed_generation != request.metadata.generation;
        if !spec_changed && self.failed_terminally(&previous) {
            if !previous.managed_resources.is_empty() {
                return self.retry_cleanup(request, previous).await;
            }
            debug!("Request failed terminally, waiting for a spec change");
            return Ok(Action::await_change());
        }

        let mut status = previous.clone();
        status.observed_generation = request.metadata.generation;
        if spec_changed {
            status.resolve_attempts = 0;
        }

        // Resolving
        let Some(entry) = self.resolve_entry(request).await? else {
            status.resolve_attempts += 1;
            let message = format!(
                "{} {} version {} not found",
                request.spec.resource_type.catalog_kind(),
                request.spec.resource_name,
                request.spec.version
            );
            if status.resolve_attempts >= settings.max_resolve_attempts {
                let message = format!("{message} after {} attempts", status.resolve_attempts);
                return self.fail(request, status, None, REASON_CATALOG_NOT_FOUND, message).await;
            }
            let backoff = settings.resolve_backoff(status.resolve_attempts);
            warn!(attempt = status.resolve_attempts, ?backoff, "{message}, retrying");
            status.phase = DeploymentPhase::Failed;
            status.ready = false;
            status.reason = Some(REASON_CATALOG_NOT_FOUND.to_string());
            status.message = Some(format!(
                "{message} (attempt {}/{})",
                status.resolve_attempts, settings.max_resolve_attempts
            ));
            status.updated_at = Some(chrono::Utc::now().to_rfc3339());
            self.write_status(request, &status).await?;
            return Ok(Action::requeue(backoff));
        };
        status.resolve_attempts = 0;

        if settings.require_verified_publisher {
            if let Err(reason) = translate::validate_publisher_identity(&entry) {
                let message = format!(
                    "deployment blocked for {} {}: {reason}",
                    request.spec.resource_name, request.spec.version
                );
                return self.fail(request, status, Some(&entry), REASON_VALIDATION, message).await;
            }
        }
        self.mark_managed(&entry).await?;

        let target = match target::resolve(&self.ctx, request).await {
            Ok(target) => target,
            Err(e) if e.is_terminal() => {
                return self.fail(request, status, Some(&entry), REASON_VALIDATION, e.to_string()).await;
            }
            Err(e) => {
                status.phase = DeploymentPhase::Pending;
                status.ready = false;
                status.reason = Some(REASON_TARGET_UNAVAILABLE.to_string());
                status.message = Some(format!("Failed to resolve target: {e}"));
                status.updated_at = Some(chrono::Utc::now().to_rfc3339());
                self.write_status(request, &status).await?;
                return Err(e);
            }
        };

        // Translating
        let objects = match translate::translate(&entry, request, &target.namespace) {
            Ok(objects) => objects,
            Err(e) => {
                let message = e.to_string();
                return self.fail(request, status, Some(&entry), REASON_TRANSLATION, message).await;
            }
        };

        // Applying
        let mut managed = Vec::with_capacity(objects.len());
        for object in &objects {
            match apply::apply(&target, object).await {
                Ok(resource) => managed.push(resource),
                Err(e) => {
                    status.phase = DeploymentPhase::Applying;
                    status.ready = false;
                    status.reason = Some(REASON_APPLY_FAILED.to_string());
                    status.message = Some(format!("failed to apply {} {}: {e}", object.kind.kind(), object.name()));
                    status.updated_at = Some(chrono::Utc::now().to_rfc3339());
                    self.write_status(request, &status).await?;
                    return Err(e);
                }
            }
        }
        self.remove_stale(request, &target, &previous, &managed).await;

        // Observing
        let (ready, message) = observe::readiness(target.store.as_ref(), &managed).await;
        let now = chrono::Utc::now().to_rfc3339();
        status.phase = if ready {
            DeploymentPhase::Running
        } else {
            DeploymentPhase::Observing
        };
        status.ready = ready;
        status.reason = None;
        status.message = (!message.is_empty()).then(|| message.clone());
        status.namespace = Some(target.namespace.clone());
        status.managed_resources = managed;
        status.updated_at = Some(now.clone());
        if status.deployed_at.is_none() {
            status.deployed_at = Some(now.clone());
        }
        let (reason, condition_message) = if ready {
            ("Deployed", String::new())
        } else {
            ("NotReady", message.clone())
        };
        set_condition(&mut status.conditions, CONDITION_READY, ready, reason, condition_message);

        if ready && !previous.ready {
            info!(namespace = %target.namespace, "✅ Deployment ready");
        }
        self.write_status(request, &status).await?;

        let summary = DeploymentSummary {
            ready,
            namespace: Some(target.namespace.clone()),
            service_name: objects.first().map(|o| o.name()),
            url: None,
            message: status.message.clone(),
            last_checked: Some(now),
        };
        observe::mirror_to_catalog(&self.ctx, entry.kind(), &entry.name_any(), summary).await?;

        if !ready || target.is_remote() {
            Ok(Action::requeue(settings.observe_interval()))
        } else {
            Ok(Action::await_change())
        }
    }

    /// Delete resources from a previous apply that the new one no longer produces
    async fn remove_stale(
        &self,
        request: &RegistryDeployment,
        target: &DeployTarget,
        previous: &RegistryDeploymentStatus,
        current: &[ManagedResource],
    ) {
        let stale: Vec<_> = previous
            .managed_resources
            .iter()
            .filter(|r| !current.contains(r))
            .cloned()
            .collect();
        let (here, elsewhere): (Vec<_>, Vec<_>) = stale.into_iter().partition(|r| r.cluster == target.cluster);
        for resource in &elsewhere {
            warn!(
                kind = %resource.kind,
                name = %resource.name,
                cluster = ?resource.cluster,
                "Stale resource lives on another cluster, leaving it in place"
            );
        }
        apply::delete_all(target.store.as_ref(), &request_key(request), &here).await;
    }

    /// Delete owned runtime resources, then release the request
    async fn finalize(&self, request: &RegistryDeployment) -> Result<Action> {
        if !request.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("🧹 Removing runtime resources of deleted deployment");

        let store = match target::resolve(&self.ctx, request).await {
            Ok(target) => target.store,
            Err(e) => {
                warn!(error = %e, "Failed to resolve target for deletion, falling back to local cluster");
                self.ctx.store.clone()
            }
        };
        let managed = request
            .status
            .as_ref()
            .map(|s| s.managed_resources.clone())
            .unwrap_or_default();
        let failed = apply::delete_all(store.as_ref(), &request_key(request), &managed).await;
        if failed > 0 {
            warn!(failed, "Some runtime resources could not be deleted, retrying");
            return Ok(Action::requeue(self.ctx.config.deployment.observe_interval()));
        }

        if let Some(entry) = self.resolve_entry(request).await? {
            let namespace = request.status.as_ref().and_then(|s| s.namespace.clone());
            let result = update_entry_status(
                self.ctx.store.as_ref(),
                entry.kind(),
                &self.ctx.namespace,
                &entry.name_any(),
                |e| {
                    let ours = e
                        .status
                        .deployment
                        .as_ref()
                        .is_some_and(|d| d.namespace == namespace);
                    if ours {
                        e.status.deployment = None;
                    }
                    ours
                },
            )
            .await;
            if let Err(e) = result {
                if !e.is_not_found() {
                    return Err(e.into());
                }
            }
        }

        self.remove_finalizer(request).await?;
        info!("Deployment removed");
        Ok(Action::await_change())
    }
}

#[async_trait]
impl Reconciler for DeploymentReconciler {
    fn name(&self) -> &'static str {
        "registry-deployment"
    }

    #[instrument(skip(self), fields(deployment = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        if key.namespace().is_none() {
            warn!("Skipping RegistryDeployment without namespace");
            return Ok(Action::await_change());
        }
        let Some(request) = get_as::<RegistryDeployment>(self.ctx.store.as_ref(), key.namespace(), &key.name).await?
        else {
            debug!("RegistryDeployment gone, nothing to do");
            return Ok(Action::await_change());
        };
        debug!(
            resource = %request.spec.resource_name,
            version = %request.spec.version,
            resource_type = %request.spec.resource_type,
            "Reconciling deployment"
        );

        if request.metadata.deletion_timestamp.is_some() {
            return self.finalize(&request).await;
        }
        let request = self.ensure_finalizer(&request).await?;
        self.deploy(&request).await
    }
}

/// Catalog kinds a deployment can reference
pub fn deployable_kinds() -> [CatalogKind; 2] {
    [CatalogKind::ToolServer, CatalogKind::Agent]
}

#[cfg(test)]
mod tests;
