//! Reverse discovery: backfill catalog entries for runtime resources that were
//! created in the local cluster without going through a deployment request.
//!
//! One [`ReverseDiscoveryReconciler`] runs per runtime kind. Each kind plugs in
//! through [`RuntimeSource`], which says which catalog kind it feeds and how its
//! spec maps onto a catalog payload.

pub mod agent;
pub mod mcpserver;
pub mod model;
pub mod skill;

pub use skill::SkillDiscoveryReconciler;

use crate::crds::{
    CatalogEntry, CatalogKind, CatalogPayload, Condition, CatalogStatus, DeploymentSummary,
    Provenance, ProvenanceSource,
};
use crate::store::{create_entry, get_as, get_entry, update_entry_status, ObjectKey};
use crate::tasks::catalog::version_of;
use crate::tasks::naming::ResourceNaming;
use crate::tasks::queue::{Action, Reconciler};
use crate::tasks::types::{
    Context, Result, LABEL_DISCOVERED, LABEL_MANAGED_BY, LABEL_RESOURCE_ENVIRONMENT,
    LABEL_RESOURCE_NAME, LABEL_RESOURCE_SOURCE, LABEL_RESOURCE_UID, LABEL_RESOURCE_VERSION,
    LABEL_SOURCE_KIND, LABEL_SOURCE_NAME, LABEL_SOURCE_NAMESPACE, MANAGED_BY_VALUE,
};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A runtime kind that can be backfilled into the catalog
pub trait RuntimeSource:
    Resource<DynamicType = ()> + ResourceExt + DeserializeOwned + Send + Sync + 'static
{
    const CATALOG_KIND: CatalogKind;

    /// Work queue name
    const CONTROLLER: &'static str;

    /// Catalog spec synthesized from this resource
    fn catalog_payload(&self, spec_name: String) -> CatalogPayload;

    /// Runtime status conditions, used for the observed deployment
    fn runtime_conditions(&self) -> &[Condition];
}

/// Produced by a deployment request; the deployment reconciler owns its catalog state
pub fn is_registry_managed<K: ResourceExt>(resource: &K) -> bool {
    resource.labels().get(LABEL_MANAGED_BY).map(String::as_str) == Some(MANAGED_BY_VALUE)
}

/// `spec.name` of a backfilled entry
pub fn local_spec_name(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn source_labels<K: RuntimeSource>(source: &K, version: &str) -> BTreeMap<String, String> {
    let namespace = source.namespace().unwrap_or_default();
    let name = source.name_any();
    let environment = ResourceNaming::environment_for_namespace(&namespace);

    BTreeMap::from([
        (LABEL_DISCOVERED.to_string(), "true".to_string()),
        (LABEL_SOURCE_KIND.to_string(), K::kind(&()).to_string()),
        (LABEL_SOURCE_NAME.to_string(), ResourceNaming::label_value(&name)),
        (LABEL_SOURCE_NAMESPACE.to_string(), ResourceNaming::label_value(&namespace)),
        (
            LABEL_RESOURCE_UID.to_string(),
            ResourceNaming::resource_uid(&name, environment, version),
        ),
        (LABEL_RESOURCE_NAME.to_string(), ResourceNaming::label_value(&name)),
        (LABEL_RESOURCE_VERSION.to_string(), ResourceNaming::label_value(version)),
        (
            LABEL_RESOURCE_ENVIRONMENT.to_string(),
            ResourceNaming::label_value(environment),
        ),
        (
            LABEL_RESOURCE_SOURCE.to_string(),
            ProvenanceSource::Discovery.as_str().to_string(),
        ),
    ])
}

/// Provenance pointing at a resource in the local cluster
pub fn local_provenance(kind: &str, namespace: &str, name: &str, now: &str) -> Provenance {
    Provenance {
        source: ProvenanceSource::Discovery,
        environment: Some(ResourceNaming::environment_for_namespace(namespace).to_string()),
        cluster: None,
        namespace: Some(namespace.to_string()),
        kind: Some(kind.to_string()),
        name: Some(name.to_string()),
        last_seen_time: Some(now.to_string()),
    }
}

fn observed_deployment<K: RuntimeSource>(source: &K, now: &str) -> DeploymentSummary {
    let (ready, message) = crate::crds::kagent::readiness(source.runtime_conditions());
    DeploymentSummary {
        ready,
        namespace: source.namespace(),
        service_name: Some(source.name_any()),
        url: None,
        message,
        last_checked: Some(now.to_string()),
    }
}

/// Backfills catalog entries for one runtime kind
pub struct ReverseDiscoveryReconciler<K> {
    ctx: Arc<Context>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: RuntimeSource> ReverseDiscoveryReconciler<K> {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            _kind: PhantomData,
        }
    }

    async fn backfill(&self, source: &K, now: &str) -> Result<()> {
        let namespace = source.namespace().unwrap_or_default();
        let name = source.name_any();
        let entry_name = ResourceNaming::local_catalog_name(&namespace, &name);
        let store = self.ctx.store.as_ref();

        if get_entry(store, K::CATALOG_KIND, &self.ctx.namespace, &entry_name)
            .await?
            .is_none()
        {
            let version = version_of(source);
            let payload = source.catalog_payload(local_spec_name(&namespace, &name));
            let mut entry = CatalogEntry::new(&entry_name, &self.ctx.namespace, payload);
            entry.metadata.labels = Some(source_labels(source, &version));
            entry.status = CatalogStatus::discovered(local_provenance(K::kind(&()).as_ref(), &namespace, &name, now), now);
            entry.status.deployment = Some(observed_deployment(source, now));

            if create_entry(store, &entry).await?.is_some() {
                info!(kind = %K::CATALOG_KIND, entry = %entry_name, "📥 Backfilled catalog entry from runtime resource");
                return Ok(());
            }
        }

        let observed = observed_deployment(source, now);
        self.sync_deployment(&entry_name, &namespace, &name, now, observed).await
    }

    /// Mirror the observed deployment onto an entry that came from this same
    /// resource, restoring the initial status of one whose create half-failed
    async fn sync_deployment(
        &self,
        entry_name: &str,
        namespace: &str,
        name: &str,
        now: &str,
        observed: DeploymentSummary,
    ) -> Result<()> {
        let origin = local_provenance(K::kind(&()).as_ref(), namespace, name, now);
        let mut initial = CatalogStatus::discovered(origin.clone(), now);
        initial.deployment = Some(observed.clone());
        let result = update_entry_status(
            self.ctx.store.as_ref(),
            K::CATALOG_KIND,
            &self.ctx.namespace,
            entry_name,
            |entry| {
                if entry.status.provenance.is_none() {
                    return entry.status.complete_from(&initial);
                }
                let same_origin = entry
                    .status
                    .provenance
                    .as_ref()
                    .is_some_and(|p| p.same_origin(&origin));
                let unchanged = entry
                    .status
                    .deployment
                    .as_ref()
                    .is_some_and(|d| d.same_observation(&observed));
                if !same_origin || unchanged {
                    return false;
                }
                entry.status.deployment = Some(observed.clone());
                if let Some(provenance) = entry.status.provenance.as_mut() {
                    provenance.last_seen_time = origin.last_seen_time.clone();
                }
                true
            },
        )
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<K: RuntimeSource> Reconciler for ReverseDiscoveryReconciler<K> {
    fn name(&self) -> &'static str {
        K::CONTROLLER
    }

    #[instrument(skip(self), fields(kind = %K::kind(&()), resource = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let now = chrono::Utc::now().to_rfc3339();
        let namespace = key.namespace().unwrap_or_default();

        let Some(source) = get_as::<K>(self.ctx.store.as_ref(), key.namespace(), &key.name).await? else {
            // Entries outlive their source; only the observed deployment goes stale
            debug!("Runtime resource gone, catalog entry preserved");
            let entry_name = ResourceNaming::local_catalog_name(namespace, &key.name);
            let gone = DeploymentSummary {
                ready: false,
                namespace: Some(namespace.to_string()),
                service_name: Some(key.name.clone()),
                message: Some("source resource deleted".to_string()),
                last_checked: Some(now.clone()),
                ..DeploymentSummary::default()
            };
            self.sync_deployment(&entry_name, namespace, &key.name, &now, gone)
                .await?;
            return Ok(Action::await_change());
        };

        if is_registry_managed(&source) {
            debug!("Resource produced by a deployment request, skipping");
            return Ok(Action::await_change());
        }

        self.backfill(&source, &now).await?;
        Ok(Action::await_change())
    }
}
