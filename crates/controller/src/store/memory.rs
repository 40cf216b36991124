use super::{ObjectKey, ResourceStore, StoreError, StoreEvent};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};

const EVENT_BUFFER: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StoredKey {
    api_version: String,
    kind: String,
    key: ObjectKey,
}

impl StoredKey {
    fn new(ar: &ApiResource, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
            key: ObjectKey::new(namespace, name),
        }
    }
}

/// In-process store with API server write semantics.
///
/// Resource versions, generation bumps on non-status changes, finalizer-aware
/// deletion and change events all behave like the real thing. Backs the local
/// store in tests and stands in for remote clusters.
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<StoredKey, DynamicObject>>,
    revision: AtomicU64,
    unavailable: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            events,
        }
    }

    /// Make every call fail with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records of a kind
    pub async fn count(&self, ar: &ApiResource) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|k| k.api_version == ar.api_version && k.kind == ar.kind)
            .count()
    }

    /// Seed a record with status in one step
    pub async fn insert(&self, ar: &ApiResource, obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let status = obj.data.get("status").cloned();
        let mut created = self.create(ar, &obj).await?;
        if let Some(status) = status {
            created.data["status"] = status;
            created = self.replace_status(ar, &created).await?;
        }
        Ok(created)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn publish(&self, obj: &DynamicObject, ar: &ApiResource, deleted: bool) {
        // No subscribers is fine
        let _ = self.events.send(StoreEvent::from_object(obj, ar, deleted));
    }

    fn name_of(obj: &DynamicObject) -> Result<String, StoreError> {
        obj.metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::Invalid("metadata.name is required".to_string()))
    }

    fn check_version(ar: &ApiResource, current: &DynamicObject, incoming: &DynamicObject) -> Result<(), StoreError> {
        match &incoming.metadata.resource_version {
            Some(rv) if Some(rv) != current.metadata.resource_version.as_ref() => Err(StoreError::Conflict {
                kind: ar.kind.clone(),
                name: current.metadata.name.clone().unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }
}

fn without_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
        map.remove("metadata");
        map.remove("apiVersion");
        map.remove("kind");
    }
    data
}

fn object_data(data: &Value) -> Value {
    match data {
        Value::Object(_) => data.clone(),
        _ => Value::Object(serde_json::Map::new()),
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects.get(&StoredKey::new(ar, namespace, name)).cloned())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.api_version == ar.api_version && k.kind == ar.kind)
            .filter(|(k, _)| namespace.is_none() || k.key.namespace() == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.check_available()?;
        let name = Self::name_of(obj)?;
        let key = StoredKey::new(ar, obj.metadata.namespace.as_deref(), &name);

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ar.kind.clone(),
                name,
            });
        }

        let mut stored = obj.clone();
        stored.types = Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        });
        stored.data = object_data(&obj.data);
        if let Some(map) = stored.data.as_object_mut() {
            map.remove("status");
        }
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(self.next_revision());
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.deletion_timestamp = None;

        objects.insert(key, stored.clone());
        drop(objects);
        self.publish(&stored, ar, false);
        Ok(stored)
    }

    async fn replace(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.check_available()?;
        let name = Self::name_of(obj)?;
        let key = StoredKey::new(ar, obj.metadata.namespace.as_deref(), &name);

        let mut objects = self.objects.write().await;
        let Some(current) = objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: ar.kind.clone(),
                name,
            });
        };
        Self::check_version(ar, current, obj)?;

        let mut next = obj.clone();
        next.types = current.types.clone();
        next.data = object_data(&obj.data);
        match current.data.get("status") {
            Some(status) => next.data["status"] = status.clone(),
            None => {
                if let Some(map) = next.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        next.metadata.uid = current.metadata.uid.clone();
        next.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        next.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        next.metadata.generation = if without_status(&current.data) != without_status(&next.data) {
            Some(generation + 1)
        } else {
            Some(generation)
        };
        next.metadata.resource_version = Some(self.next_revision());

        let finalized = next.metadata.deletion_timestamp.is_some()
            && next.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
        if finalized {
            objects.remove(&key);
            drop(objects);
            self.publish(&next, ar, true);
        } else {
            objects.insert(key, next.clone());
            drop(objects);
            self.publish(&next, ar, false);
        }
        Ok(next)
    }

    async fn replace_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.check_available()?;
        let name = Self::name_of(obj)?;
        let key = StoredKey::new(ar, obj.metadata.namespace.as_deref(), &name);

        let mut objects = self.objects.write().await;
        let Some(current) = objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: ar.kind.clone(),
                name,
            });
        };
        Self::check_version(ar, current, obj)?;

        let mut next = current.clone();
        match obj.data.get("status") {
            Some(status) => next.data["status"] = status.clone(),
            None => {
                if let Some(map) = next.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        next.metadata.resource_version = Some(self.next_revision());
        objects.insert(key, next.clone());
        drop(objects);
        self.publish(&next, ar, false);
        Ok(next)
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let key = StoredKey::new(ar, namespace, name);

        let mut objects = self.objects.write().await;
        let Some(current) = objects.get_mut(&key) else {
            return Err(StoreError::NotFound {
                kind: ar.kind.clone(),
                name: name.to_string(),
            });
        };

        let has_finalizers = current.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if current.metadata.deletion_timestamp.is_none() {
                current.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                current.metadata.resource_version = Some(self.next_revision());
                let snapshot = current.clone();
                drop(objects);
                self.publish(&snapshot, ar, false);
            }
            return Ok(());
        }

        if let Some(removed) = objects.remove(&key) {
            drop(objects);
            self.publish(&removed, ar, true);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ar() -> ApiResource {
        crate::crds::CatalogKind::ToolServer.api_resource()
    }

    fn object(name: &str, spec: Value) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &ar()).within("agentregistry");
        obj.data = json!({ "spec": spec });
        obj
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryStore::new();
        store.create(&ar(), &object("fs", json!({}))).await.unwrap();

        let err = store.create(&ar(), &object("fs", json!({}))).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create(&ar(), &object("fs", json!({"a": 1}))).await.unwrap();

        let mut first = created.clone();
        first.data["spec"] = json!({"a": 2});
        store.replace(&ar(), &first).await.unwrap();

        let mut stale = created;
        stale.data["spec"] = json!({"a": 3});
        let err = store.replace(&ar(), &stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_generation_moves_only_on_spec_change() {
        let store = InMemoryStore::new();
        let created = store.create(&ar(), &object("fs", json!({"a": 1}))).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));

        let mut with_status = created.clone();
        with_status.data["status"] = json!({"published": true});
        let updated = store.replace_status(&ar(), &with_status).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(1));

        let mut relabeled = updated.clone();
        relabeled.metadata.labels = Some([("team".to_string(), "x".to_string())].into());
        let updated = store.replace(&ar(), &relabeled).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(1));
        assert_eq!(updated.data["status"]["published"], true);

        let mut respec = updated;
        respec.data["spec"] = json!({"a": 2});
        let updated = store.replace(&ar(), &respec).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = InMemoryStore::new();
        let mut obj = object("fs", json!({}));
        obj.metadata.finalizers = Some(vec!["agentregistry.dev/finalizer".to_string()]);
        store.create(&ar(), &obj).await.unwrap();
        let mut events = store.subscribe();

        store.delete(&ar(), Some("agentregistry"), "fs").await.unwrap();
        let deleting = store.get(&ar(), Some("agentregistry"), "fs").await.unwrap().unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());
        assert!(events.recv().await.unwrap().deleting);

        let mut released = deleting;
        released.metadata.finalizers = Some(vec![]);
        store.replace(&ar(), &released).await.unwrap();
        assert!(store.get(&ar(), Some("agentregistry"), "fs").await.unwrap().is_none());
        assert!(events.recv().await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store.list(&ar(), None).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
