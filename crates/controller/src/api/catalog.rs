//! Direct catalog submission.

use super::{ApiError, ApiResult};
use crate::crds::{CatalogEntry, CatalogKind, CatalogPayload, ManagementType, Provenance};
use crate::store::{
    create_entry, get_entry, modify_with_retry, ResourceStore, WriteTarget,
};
use crate::tasks::naming::ResourceNaming;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct CatalogApi {
    store: Arc<dyn ResourceStore>,
    namespace: String,
}

impl CatalogApi {
    pub fn new(store: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Record name for (name, version); models are unversioned
    pub fn entry_name(name: &str, version: Option<&str>) -> String {
        match version.filter(|v| !v.is_empty()) {
            Some(version) => ResourceNaming::catalog_entry_name(name, version),
            None => ResourceNaming::sanitize(name),
        }
    }

    pub async fn get(&self, kind: CatalogKind, name: &str, version: Option<&str>) -> ApiResult<Option<CatalogEntry>> {
        let entry_name = Self::entry_name(name, version);
        Ok(get_entry(self.store.as_ref(), kind, &self.namespace, &entry_name).await?)
    }

    /// Create or update the entry identified by (kind, name, version).
    ///
    /// A new entry is published immediately with manual provenance. Submitting
    /// the same spec and labels again writes nothing.
    pub async fn upsert(&self, spec: CatalogPayload, labels: BTreeMap<String, String>) -> ApiResult<CatalogEntry> {
        if spec.name().trim().is_empty() {
            return Err(ApiError::Invalid("catalog entry name is required".to_string()));
        }
        let kind = spec.kind();
        let entry_name = Self::entry_name(spec.name(), spec.version());

        let existing = match get_entry(self.store.as_ref(), kind, &self.namespace, &entry_name).await? {
            Some(existing) => existing,
            None => {
                let mut entry = CatalogEntry::new(&entry_name, &self.namespace, spec.clone());
                entry.labels_mut().extend(labels.clone());
                entry.status.publish(&chrono::Utc::now().to_rfc3339());
                entry.status.management_type = Some(ManagementType::External);
                entry.status.provenance = Some(Provenance::manual());
                if let Some(created) = create_entry(self.store.as_ref(), &entry).await? {
                    info!(kind = %kind, name = %entry_name, "📚 Catalog entry created");
                    return Ok(created);
                }
                // Lost the create race, update the winner instead
                get_entry(self.store.as_ref(), kind, &self.namespace, &entry_name)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("{kind} {entry_name}")))?
            }
        };

        let labels_present = labels.iter().all(|(k, v)| existing.label(k) == Some(v.as_str()));
        if existing.spec == spec && labels_present {
            debug!(kind = %kind, name = %entry_name, "Catalog entry unchanged");
            return Ok(existing);
        }

        let spec_value = serde_json::to_value(&spec).map_err(crate::store::StoreError::from)?;
        let obj = modify_with_retry(
            self.store.as_ref(),
            &kind.api_resource(),
            Some(&self.namespace),
            &entry_name,
            WriteTarget::Object,
            |obj| {
                obj.data["spec"] = spec_value.clone();
                obj.metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(labels.clone());
                Ok(true)
            },
        )
        .await?;
        info!(kind = %kind, name = %entry_name, "📚 Catalog entry updated");
        Ok(CatalogEntry::from_dynamic(kind, obj).map_err(crate::store::StoreError::from)?)
    }

    /// Returns `false` when there was nothing to delete
    pub async fn delete(&self, kind: CatalogKind, name: &str, version: Option<&str>) -> ApiResult<bool> {
        let entry_name = Self::entry_name(name, version);
        match self
            .store
            .delete(&kind.api_resource(), Some(&self.namespace), &entry_name)
            .await
        {
            Ok(()) => {
                info!(kind = %kind, name = %entry_name, "Catalog entry deleted");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{LifecycleStatus, ProvenanceSource, SkillPayload};
    use crate::store::InMemoryStore;

    fn skill(description: &str) -> CatalogPayload {
        CatalogPayload::Skill(SkillPayload {
            name: "pdf-summarizer".to_string(),
            version: "0.3.0".to_string(),
            description: description.to_string(),
            ..SkillPayload::default()
        })
    }

    #[tokio::test]
    async fn test_upsert_creates_published_entry() {
        let store = Arc::new(InMemoryStore::new());
        let api = CatalogApi::new(store.clone(), "agentregistry");

        let entry = api.upsert(skill("Summarize PDFs"), BTreeMap::new()).await.unwrap();

        assert_eq!(entry.name_any(), "pdf-summarizer-0-3-0");
        assert!(entry.status.published);
        assert_eq!(entry.status.status, Some(LifecycleStatus::Active));
        assert_eq!(entry.status.provenance.unwrap().source, ProvenanceSource::Manual);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_updates_spec() {
        let store = Arc::new(InMemoryStore::new());
        let api = CatalogApi::new(store.clone(), "agentregistry");
        let first = api.upsert(skill("Summarize PDFs"), BTreeMap::new()).await.unwrap();

        let again = api.upsert(skill("Summarize PDFs"), BTreeMap::new()).await.unwrap();
        assert_eq!(again.metadata.resource_version, first.metadata.resource_version);

        let labels = BTreeMap::from([("team".to_string(), "docs".to_string())]);
        let updated = api.upsert(skill("Summarize long PDFs"), labels).await.unwrap();
        assert_ne!(updated.metadata.resource_version, first.metadata.resource_version);
        assert_eq!(updated.label("team"), Some("docs"));
        assert!(updated.status.published);
        assert_eq!(store.count(&CatalogKind::Skill.api_resource()).await, 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_nameless_entry() {
        let api = CatalogApi::new(Arc::new(InMemoryStore::new()), "agentregistry");
        let err = api
            .upsert(CatalogPayload::Skill(SkillPayload::default()), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_missing_entry() {
        let store = Arc::new(InMemoryStore::new());
        let api = CatalogApi::new(store.clone(), "agentregistry");
        api.upsert(skill("Summarize PDFs"), BTreeMap::new()).await.unwrap();

        assert!(api.delete(CatalogKind::Skill, "pdf-summarizer", Some("0.3.0")).await.unwrap());
        assert!(!api.delete(CatalogKind::Skill, "pdf-summarizer", Some("0.3.0")).await.unwrap());
        assert!(api
            .get(CatalogKind::Skill, "pdf-summarizer", Some("0.3.0"))
            .await
            .unwrap()
            .is_none());
    }
}
