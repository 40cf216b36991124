//! One discovery pass over one environment.

use crate::crds::kagent::{Agent, MCPServer, ModelConfig};
use crate::crds::{
    CatalogEntry, CatalogKind, CatalogPayload, DiscoveredResourceCounts, Environment,
    CatalogStatus, EnvironmentStatus, Provenance, ProvenanceSource,
};
use crate::store::{create_entry, get_entry, list_as, update_entry_status, ResourceStore, StoreError};
use crate::tasks::catalog::{self, SkillReference};
use crate::tasks::naming::ResourceNaming;
use crate::tasks::types::{
    Context, Error, Result, LABEL_CLUSTER, LABEL_DISCOVERED, LABEL_ENVIRONMENT, LABEL_SKILL_DISCOVERED,
    LABEL_SKILL_SOURCE, LABEL_SOURCE_KIND, LABEL_SOURCE_NAME, LABEL_SOURCE_NAMESPACE,
};
use kube::core::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Failure while scanning, split by which side failed
enum ScanError {
    /// The remote cluster could not be read
    Remote(String),
    /// Writing the local catalog failed
    Local(Error),
}

impl From<Error> for ScanError {
    fn from(e: Error) -> Self {
        ScanError::Local(e)
    }
}

impl From<StoreError> for ScanError {
    fn from(e: StoreError) -> Self {
        ScanError::Local(e.into())
    }
}

/// Result of a scan that could not reach the environment
pub fn disconnected(environment: &Environment, previous: Option<&EnvironmentStatus>, message: String) -> EnvironmentStatus {
    EnvironmentStatus {
        name: environment.name.clone(),
        connected: false,
        last_sync_time: previous.and_then(|p| p.last_sync_time.clone()),
        discovered_resources: previous
            .map(|p| p.discovered_resources.clone())
            .unwrap_or_default(),
        message: Some(message),
    }
}

/// Connect, list and upsert.
///
/// Remote failures are folded into the returned status; only local store
/// failures are returned as errors.
pub async fn scan_environment(
    ctx: &Context,
    environment: &Environment,
    previous: Option<&EnvironmentStatus>,
    now: &str,
) -> Result<EnvironmentStatus> {
    let remote = match ctx.connector.connect(environment).await {
        Ok(remote) => remote,
        Err(e) => {
            warn!(environment = %environment.name, error = %e, "Environment unreachable");
            ctx.connector.invalidate(&environment.name);
            return Ok(disconnected(environment, previous, e.to_string()));
        }
    };

    match discover(ctx, remote.as_ref(), environment, now).await {
        Ok(counts) => {
            info!(
                environment = %environment.name,
                tool_servers = counts.tool_servers,
                agents = counts.agents,
                skills = counts.skills,
                models = counts.models,
                "✅ Discovery pass complete"
            );
            Ok(EnvironmentStatus {
                name: environment.name.clone(),
                connected: true,
                last_sync_time: Some(now.to_string()),
                discovered_resources: counts,
                message: None,
            })
        }
        Err(ScanError::Remote(message)) => {
            warn!(environment = %environment.name, error = %message, "Listing remote resources failed");
            ctx.connector.invalidate(&environment.name);
            Ok(disconnected(environment, previous, message))
        }
        Err(ScanError::Local(e)) => Err(e),
    }
}

async fn discover(
    ctx: &Context,
    remote: &dyn ResourceStore,
    environment: &Environment,
    now: &str,
) -> Result<DiscoveredResourceCounts, ScanError> {
    let kinds = environment.allowed_kinds();
    let mut counts = DiscoveredResourceCounts::default();

    if kinds.contains(&CatalogKind::ToolServer) {
        for server in list_remote::<MCPServer>(remote, environment).await? {
            let spec_name = spec_name_of(environment, &server);
            let payload = CatalogPayload::ToolServer(catalog::tool_server_payload(&server, spec_name));
            upsert(ctx, environment, &server, payload, now).await?;
            counts.add(CatalogKind::ToolServer, 1);
        }
    }

    let wants_agents = kinds.contains(&CatalogKind::Agent);
    let wants_skills = kinds.contains(&CatalogKind::Skill);
    if wants_agents || wants_skills {
        let mut skills = BTreeSet::new();
        for agent in list_remote::<Agent>(remote, environment).await? {
            if wants_agents {
                let spec_name = spec_name_of(environment, &agent);
                let payload = CatalogPayload::Agent(catalog::agent_payload(&agent, spec_name));
                upsert(ctx, environment, &agent, payload, now).await?;
                counts.add(CatalogKind::Agent, 1);
            }
            if wants_skills {
                for reference in agent.spec.skill_refs() {
                    let reference = SkillReference::parse(reference);
                    upsert_skill(ctx, environment, &agent, &reference, now).await?;
                    skills.insert(reference.catalog_name());
                }
            }
        }
        counts.add(CatalogKind::Skill, skills.len() as u32);
    }

    if kinds.contains(&CatalogKind::Model) {
        for model in list_remote::<ModelConfig>(remote, environment).await? {
            let spec_name = spec_name_of(environment, &model);
            let payload = CatalogPayload::Model(catalog::model_payload(&model, spec_name));
            upsert(ctx, environment, &model, payload, now).await?;
            counts.add(CatalogKind::Model, 1);
        }
    }

    Ok(counts)
}

/// List a kind across the environment's namespaces. A kind whose CRD is not
/// installed on the remote cluster lists as empty.
async fn list_remote<K>(remote: &dyn ResourceStore, environment: &Environment) -> Result<Vec<K>, ScanError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let namespaces: Vec<Option<&str>> = if environment.namespaces.is_empty() {
        vec![None]
    } else {
        environment.namespaces.iter().map(|ns| Some(ns.as_str())).collect()
    };

    let mut found = Vec::new();
    for namespace in namespaces {
        match list_as::<K>(remote, namespace).await {
            Ok(items) => found.extend(items),
            Err(e) if e.is_not_found() => {
                let kind = ApiResource::erase::<K>(&()).kind;
                debug!(environment = %environment.name, kind, "Kind not served by cluster");
            }
            Err(e) => return Err(ScanError::Remote(e.to_string())),
        }
    }
    Ok(found)
}

fn spec_name_of<K: ResourceExt>(environment: &Environment, resource: &K) -> String {
    ResourceNaming::discovered_spec_name(
        &environment.name,
        &resource.namespace().unwrap_or_default(),
        &resource.name_any(),
    )
}

fn discovery_labels(environment: &Environment, source_kind: &str, namespace: &str, name: &str) -> BTreeMap<String, String> {
    let mut labels = environment.labels.clone();
    labels.insert(LABEL_DISCOVERED.to_string(), "true".to_string());
    labels.insert(LABEL_SOURCE_KIND.to_string(), source_kind.to_string());
    labels.insert(LABEL_SOURCE_NAME.to_string(), ResourceNaming::label_value(name));
    labels.insert(LABEL_SOURCE_NAMESPACE.to_string(), ResourceNaming::label_value(namespace));
    labels.insert(LABEL_ENVIRONMENT.to_string(), ResourceNaming::label_value(&environment.name));
    labels.insert(
        LABEL_CLUSTER.to_string(),
        ResourceNaming::label_value(&environment.cluster.name),
    );
    labels
}

fn provenance(environment: &Environment, source_kind: &str, namespace: &str, name: &str, now: &str) -> Provenance {
    Provenance {
        source: ProvenanceSource::Discovery,
        environment: Some(environment.name.clone()),
        cluster: Some(environment.cluster.name.clone()).filter(|c| !c.is_empty()),
        namespace: Some(namespace.to_string()),
        kind: Some(source_kind.to_string()),
        name: Some(name.to_string()),
        last_seen_time: Some(now.to_string()),
    }
}

async fn upsert<K>(
    ctx: &Context,
    environment: &Environment,
    source: &K,
    payload: CatalogPayload,
    now: &str,
) -> Result<(), ScanError>
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let namespace = source.namespace().unwrap_or_default();
    let name = source.name_any();
    let source_kind = K::kind(&()).to_string();
    let entry_name = ResourceNaming::discovered_catalog_name(&environment.name, &namespace, &name);

    let labels = discovery_labels(environment, &source_kind, &namespace, &name);
    let origin = provenance(environment, &source_kind, &namespace, &name, now);
    write_entry(ctx, &entry_name, payload, labels, origin).await
}

async fn upsert_skill(
    ctx: &Context,
    environment: &Environment,
    agent: &Agent,
    reference: &SkillReference,
    now: &str,
) -> Result<(), ScanError> {
    let namespace = agent.namespace().unwrap_or_default();
    let name = agent.name_any();
    let mut labels = discovery_labels(environment, "Agent", &namespace, &name);
    labels.insert(LABEL_SKILL_DISCOVERED.to_string(), "true".to_string());
    labels.insert(LABEL_SKILL_SOURCE.to_string(), "agent".to_string());
    let origin = provenance(environment, "Agent", &namespace, &name, now);
    write_entry(
        ctx,
        &reference.catalog_name(),
        CatalogPayload::Skill(reference.payload()),
        labels,
        origin,
    )
    .await
}

/// Create-if-absent; an existing entry only has its sighting time refreshed,
/// and only when the entry was created from this same source. An entry left
/// without provenance by a failed create gets its initial status back.
async fn write_entry(
    ctx: &Context,
    entry_name: &str,
    payload: CatalogPayload,
    labels: BTreeMap<String, String>,
    origin: Provenance,
) -> Result<(), ScanError> {
    let kind = payload.kind();
    let store = ctx.store.as_ref();

    let now = origin.last_seen_time.clone().unwrap_or_default();
    let initial = CatalogStatus::discovered(origin.clone(), &now);

    if get_entry(store, kind, &ctx.namespace, entry_name).await?.is_none() {
        let mut entry = CatalogEntry::new(entry_name, &ctx.namespace, payload);
        entry.metadata.labels = Some(labels);
        entry.status = initial.clone();

        if create_entry(store, &entry).await?.is_some() {
            info!(kind = %kind, name = entry_name, "📥 Cataloged discovered resource");
            return Ok(());
        }
    }

    let refreshed = origin.last_seen_time.clone();
    match update_entry_status(store, kind, &ctx.namespace, entry_name, |entry| {
        if entry.status.provenance.is_none() {
            return entry.status.complete_from(&initial);
        }
        match entry.status.provenance.as_mut() {
            Some(existing) if existing.same_origin(&origin) && existing.last_seen_time != refreshed => {
                existing.last_seen_time = refreshed.clone();
                true
            }
            _ => false,
        }
    })
    .await
    {
        Ok(_) => Ok(()),
        // Deleted by an operator between the read and the write
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
