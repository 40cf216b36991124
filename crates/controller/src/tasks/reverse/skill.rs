//! Skills referenced by local agents, and which agents use which skills and
//! models.
//!
//! Skills have no runtime kind of their own: an Agent's `spec.skills.refs` is the
//! only place they show up, so this reconciler is keyed by Agent.

use super::local_provenance;
use crate::crds::kagent::Agent;
use crate::crds::{CatalogEntry, CatalogKind, CatalogPayload, CatalogStatus, ProvenanceSource, UsageRef};
use crate::store::{create_entry, get_as, get_entry, list_entries, update_entry_status, ObjectKey};
use crate::tasks::catalog::SkillReference;
use crate::tasks::naming::ResourceNaming;
use crate::tasks::queue::{Action, Reconciler};
use crate::tasks::types::{
    Context, Result, LABEL_RESOURCE_SOURCE, LABEL_SKILL_DISCOVERED, LABEL_SKILL_SOURCE,
};
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct SkillDiscoveryReconciler {
    ctx: Arc<Context>,
}

impl SkillDiscoveryReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Create the skill entry if missing; returns its catalog name
    async fn ensure_skill(&self, agent: &Agent, reference: &SkillReference, now: &str) -> Result<String> {
        let entry_name = reference.catalog_name();
        let store = self.ctx.store.as_ref();
        let initial = CatalogStatus::discovered(
            local_provenance("Agent", &agent.namespace().unwrap_or_default(), &agent.name_any(), now),
            now,
        );
        match get_entry(store, CatalogKind::Skill, &self.ctx.namespace, &entry_name).await? {
            Some(existing) if existing.status.provenance.is_some() => return Ok(entry_name),
            Some(_) => {
                let repaired = update_entry_status(store, CatalogKind::Skill, &self.ctx.namespace, &entry_name, |e| {
                    e.status.complete_from(&initial)
                })
                .await;
                match repaired {
                    Ok(_) => debug!(entry = %entry_name, "Restored status of skill entry"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                return Ok(entry_name);
            }
            None => {}
        }

        let mut entry = CatalogEntry::new(
            &entry_name,
            &self.ctx.namespace,
            CatalogPayload::Skill(reference.payload()),
        );
        entry.metadata.labels = Some(BTreeMap::from([
            (LABEL_SKILL_DISCOVERED.to_string(), "true".to_string()),
            (LABEL_SKILL_SOURCE.to_string(), "agent".to_string()),
            (
                LABEL_RESOURCE_SOURCE.to_string(),
                ProvenanceSource::Discovery.as_str().to_string(),
            ),
        ]));
        entry.status = initial;

        if create_entry(store, &entry).await?.is_some() {
            info!(skill = %reference.reference, entry = %entry_name, "📥 Cataloged skill referenced by agent");
        }
        Ok(entry_name)
    }

    /// Make `usage` appear in `usedBy` of exactly the entries named in `wanted`
    async fn sync_usage(&self, kind: CatalogKind, usage: &UsageRef, wanted: &BTreeSet<String>) -> Result<()> {
        let entries = list_entries(self.ctx.store.as_ref(), kind, Some(&self.ctx.namespace)).await?;
        for entry in entries {
            let name = entry.name_any();
            let should_use = wanted.contains(&name);
            if uses(&entry, usage) == should_use {
                continue;
            }
            let result = update_entry_status(self.ctx.store.as_ref(), kind, &self.ctx.namespace, &name, |e| {
                if uses(e, usage) == should_use {
                    return false;
                }
                if should_use {
                    e.status.used_by.push(usage.clone());
                    e.status.used_by.sort();
                } else {
                    e.status
                        .used_by
                        .retain(|u| !(u.namespace == usage.namespace && u.name == usage.name));
                }
                true
            })
            .await;
            match result {
                Ok(_) => debug!(kind = %kind, entry = %name, in_use = should_use, "Updated usage"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn uses(entry: &CatalogEntry, usage: &UsageRef) -> bool {
    entry
        .status
        .used_by
        .iter()
        .any(|u| u.namespace == usage.namespace && u.name == usage.name)
}

#[async_trait]
impl Reconciler for SkillDiscoveryReconciler {
    fn name(&self) -> &'static str {
        "skill-discovery"
    }

    #[instrument(skip(self), fields(agent = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let namespace = key.namespace().unwrap_or_default().to_string();
        let usage = UsageRef {
            namespace: namespace.clone(),
            name: key.name.clone(),
            kind: Some("Agent".to_string()),
        };
        let now = chrono::Utc::now().to_rfc3339();

        let agent = get_as::<Agent>(self.ctx.store.as_ref(), key.namespace(), &key.name)
            .await?
            .filter(|a| a.metadata.deletion_timestamp.is_none());

        let mut skills = BTreeSet::new();
        let mut models = BTreeSet::new();
        match &agent {
            Some(agent) => {
                for reference in agent.spec.skill_refs() {
                    let reference = SkillReference::parse(reference);
                    match self.ensure_skill(agent, &reference, &now).await {
                        Ok(entry_name) => {
                            skills.insert(entry_name);
                        }
                        // One bad reference must not hide the others
                        Err(e) if !e.is_store_unavailable() => {
                            warn!(skill = %reference.reference, error = %e, "Failed to catalog skill");
                        }
                        Err(e) => return Err(e),
                    }
                }
                if let Some(model) = agent
                    .spec
                    .declarative
                    .as_ref()
                    .map(|d| d.model_config.as_str())
                    .filter(|m| !m.is_empty())
                {
                    models.insert(ResourceNaming::local_catalog_name(&namespace, model));
                }
            }
            None => debug!("Agent gone, releasing its skill and model usage"),
        }

        self.sync_usage(CatalogKind::Skill, &usage, &skills).await?;
        self.sync_usage(CatalogKind::Model, &usage, &models).await?;
        Ok(Action::await_change())
    }
}
