//! Declarative record store.
//!
//! Every reconciler talks to records through [`ResourceStore`]: reads are
//! served from watch-fed mirrors, writes go to the authoritative API and are
//! conditional on `metadata.resourceVersion`.

use crate::crds::{CatalogEntry, CatalogKind, CatalogStatus};
use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::InMemoryStore;

/// Attempts made by [`modify_with_retry`] before giving up on conflicts
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 5;
const CONFLICT_RETRY_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflicting write to {kind} {name}")]
    Conflict { kind: String, name: String },

    #[error("invalid object: {0}")]
    Invalid(String),

    /// Credentials rejected by the API server (401/403)
    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, StoreError::Forbidden(_))
    }
}

/// Namespace/name of a record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn of(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Change notification fanned out to every subscriber
#[derive(Clone, Debug)]
pub struct StoreEvent {
    pub api_version: String,
    pub kind: String,
    pub key: ObjectKey,
    pub generation: Option<i64>,
    /// `deletionTimestamp` is set but finalizers are pending
    pub deleting: bool,
    /// The record is gone
    pub deleted: bool,
    pub labels: BTreeMap<String, String>,
}

impl StoreEvent {
    pub fn from_object(obj: &DynamicObject, ar: &ApiResource, deleted: bool) -> Self {
        Self {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
            key: ObjectKey::of(obj),
            generation: obj.metadata.generation,
            deleting: obj.metadata.deletion_timestamp.is_some(),
            deleted,
            labels: obj.metadata.labels.clone().unwrap_or_default(),
        }
    }

    pub fn is_for(&self, ar: &ApiResource) -> bool {
        self.api_version == ar.api_version && self.kind == ar.kind
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// All records of a kind, optionally restricted to one namespace
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create; fails with `AlreadyExists` when the name is taken. Status is
    /// not persisted on create.
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject)
        -> Result<DynamicObject, StoreError>;

    /// Replace everything but status, conditional on `resourceVersion`
    async fn replace(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace only status, conditional on `resourceVersion`
    async fn replace_status(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete, or mark deleting when finalizers are present
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Which half of a record a retried write targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteTarget {
    Object,
    Status,
}

/// Read-modify-write with optimistic concurrency.
///
/// `mutate` returns `false` when nothing needs writing. Conflicts re-read and
/// re-apply the mutation up to [`CONFLICT_RETRY_ATTEMPTS`] times.
pub async fn modify_with_retry<F>(
    store: &dyn ResourceStore,
    ar: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    target: WriteTarget,
    mut mutate: F,
) -> Result<DynamicObject, StoreError>
where
    F: FnMut(&mut DynamicObject) -> Result<bool, StoreError> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut obj) = store.get(ar, namespace, name).await? else {
            return Err(StoreError::NotFound {
                kind: ar.kind.clone(),
                name: name.to_string(),
            });
        };
        if !mutate(&mut obj)? {
            return Ok(obj);
        }
        let written = match target {
            WriteTarget::Object => store.replace(ar, &obj).await,
            WriteTarget::Status => store.replace_status(ar, &obj).await,
        };
        match written {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRY_ATTEMPTS => {
                debug!(kind = %ar.kind, name, attempt, "Write conflict, retrying with fresh read");
                tokio::time::sleep(CONFLICT_RETRY_STEP * attempt).await;
            }
            other => return other,
        }
    }
}

/// Serialize a typed resource into the store representation
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject, StoreError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".into(), K::api_version(&()).into_owned().into());
        map.insert("kind".into(), K::kind(&()).into_owned().into());
    }
    Ok(serde_json::from_value(value)?)
}

pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub async fn get_as<K>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = ApiResource::erase::<K>(&());
    store
        .get(&ar, namespace, name)
        .await?
        .map(from_dynamic)
        .transpose()
}

pub async fn list_as<K>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
) -> Result<Vec<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = ApiResource::erase::<K>(&());
    store
        .list(&ar, namespace)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

pub async fn get_entry(
    store: &dyn ResourceStore,
    kind: CatalogKind,
    namespace: &str,
    name: &str,
) -> Result<Option<CatalogEntry>, StoreError> {
    match store.get(&kind.api_resource(), Some(namespace), name).await? {
        Some(obj) => Ok(Some(CatalogEntry::from_dynamic(kind, obj)?)),
        None => Ok(None),
    }
}

pub async fn list_entries(
    store: &dyn ResourceStore,
    kind: CatalogKind,
    namespace: Option<&str>,
) -> Result<Vec<CatalogEntry>, StoreError> {
    store
        .list(&kind.api_resource(), namespace)
        .await?
        .into_iter()
        .map(|obj| CatalogEntry::from_dynamic(kind, obj).map_err(StoreError::from))
        .collect()
}

/// Create an entry and persist its status in a second, conflict-retried write.
///
/// Returns `Ok(None)` when another writer created the name first; the existing
/// record is left untouched. If the status write fails the entry exists
/// without status; [`CatalogStatus::complete_from`] lets later upserts repair it.
pub async fn create_entry(
    store: &dyn ResourceStore,
    entry: &CatalogEntry,
) -> Result<Option<CatalogEntry>, StoreError> {
    let kind = entry.kind();
    let ar = kind.api_resource();
    let created = match store.create(&ar, &entry.to_dynamic()?).await {
        Ok(obj) => obj,
        Err(StoreError::AlreadyExists { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    if entry.status == CatalogStatus::default() {
        return Ok(Some(CatalogEntry::from_dynamic(kind, created)?));
    }
    let name = created.metadata.name.clone().unwrap_or_default();
    let written = modify_with_retry(
        store,
        &ar,
        created.metadata.namespace.as_deref(),
        &name,
        WriteTarget::Status,
        |obj| {
            let mut stored = CatalogEntry::from_dynamic(kind, obj.clone())?;
            if stored.status == CatalogStatus::default() {
                stored.status = entry.status.clone();
            } else if !stored.status.complete_from(&entry.status) {
                return Ok(false);
            }
            obj.data["status"] = serde_json::to_value(&stored.status)?;
            Ok(true)
        },
    )
    .await?;
    Ok(Some(CatalogEntry::from_dynamic(kind, written)?))
}

/// Status-only update of a catalog entry with conflict retry
pub async fn update_entry_status<F>(
    store: &dyn ResourceStore,
    kind: CatalogKind,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<CatalogEntry, StoreError>
where
    F: FnMut(&mut CatalogEntry) -> bool + Send,
{
    let obj = modify_with_retry(
        store,
        &kind.api_resource(),
        Some(namespace),
        name,
        WriteTarget::Status,
        |obj| {
            let mut entry = CatalogEntry::from_dynamic(kind, obj.clone())?;
            if !mutate(&mut entry) {
                return Ok(false);
            }
            obj.data["status"] = serde_json::to_value(&entry.status)?;
            Ok(true)
        },
    )
    .await?;
    Ok(CatalogEntry::from_dynamic(kind, obj)?)
}
