use super::{ResourceStore, StoreError, StoreEvent};
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 4096;

type MirrorKey = (String, String);

fn mirror_key(ar: &ApiResource) -> MirrorKey {
    (ar.api_version.clone(), ar.kind.clone())
}

/// Map API errors onto the store taxonomy
pub(crate) fn map_kube_error(err: kube::Error, ar: &ApiResource, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: ar.kind.clone(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: ar.kind.clone(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind: ar.kind.clone(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => StoreError::Invalid(ae.message),
        kube::Error::Api(ae) if ae.code == 401 || ae.code == 403 => {
            StoreError::Forbidden(format!("{} ({})", ae.message, ae.reason))
        }
        kube::Error::SerdeError(e) => StoreError::Serialization(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// API server backed store.
///
/// Kinds registered with [`KubeStore::mirrored`] are read from reflector
/// caches that also feed [`ResourceStore::subscribe`]; anything else is read
/// straight from the API server. Writes always go to the API server.
pub struct KubeStore {
    client: Client,
    mirrors: HashMap<MirrorKey, reflector::Store<DynamicObject>>,
    events: broadcast::Sender<StoreEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl KubeStore {
    /// Handle without mirrors, used for remote clusters
    pub fn direct(client: Client) -> Self {
        let (events, _) = broadcast::channel(1);
        Self {
            client,
            mirrors: HashMap::new(),
            events,
            tasks: Vec::new(),
        }
    }

    /// Start cluster-wide reflectors for `resources` and wait for their
    /// initial list, bounded by `sync_timeout`.
    pub async fn mirrored(
        client: Client,
        resources: Vec<ApiResource>,
        sync_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let mut mirrors = HashMap::new();
        let mut tasks = Vec::new();

        for ar in resources {
            let writer = reflector::store::Writer::<DynamicObject>::new(ar.clone());
            let reader = writer.as_reader();
            let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
            let sender = events.clone();
            let watched = ar.clone();

            let task = tokio::spawn(async move {
                let stream = watcher::watcher(api, watcher::Config::default().any_semantic())
                    .default_backoff()
                    .reflect(writer);
                futures::pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(Event::Apply(obj) | Event::InitApply(obj)) => {
                            let _ = sender.send(StoreEvent::from_object(&obj, &watched, false));
                        }
                        Ok(Event::Delete(obj)) => {
                            let _ = sender.send(StoreEvent::from_object(&obj, &watched, true));
                        }
                        Ok(Event::Init | Event::InitDone) => {}
                        Err(e) => {
                            warn!(kind = %watched.kind, error = %e, "Watch stream error, backing off");
                        }
                    }
                }
                debug!(kind = %watched.kind, "Watch stream ended");
            });

            mirrors.insert(mirror_key(&ar), reader);
            tasks.push(task);
        }

        for (key, reader) in &mirrors {
            match tokio::time::timeout(sync_timeout, reader.wait_until_ready()).await {
                Ok(Ok(())) => info!("📦 Mirror ready for {}/{}", key.0, key.1),
                Ok(Err(e)) => return Err(StoreError::Unavailable(e.to_string())),
                Err(_) => {
                    return Err(StoreError::Unavailable(format!(
                        "timed out syncing {}/{} after {sync_timeout:?}",
                        key.0, key.1
                    )))
                }
            }
        }

        Ok(Self {
            client,
            mirrors,
            events,
            tasks,
        })
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn name_of(obj: &DynamicObject) -> Result<&str, StoreError> {
        obj.metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Invalid("metadata.name is required".to_string()))
    }
}

impl Drop for KubeStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        if let Some(mirror) = self.mirrors.get(&mirror_key(ar)) {
            let mut reference = ObjectRef::new_with(name, ar.clone());
            if let Some(ns) = namespace {
                reference = reference.within(ns);
            }
            return Ok(mirror.get(&reference).map(|obj| obj.as_ref().clone()));
        }

        match self.api(ar, namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(map_kube_error(e, ar, name)),
        }
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        if let Some(mirror) = self.mirrors.get(&mirror_key(ar)) {
            return Ok(mirror
                .state()
                .into_iter()
                .filter(|obj| namespace.is_none() || obj.metadata.namespace.as_deref() == namespace)
                .map(|obj| obj.as_ref().clone())
                .collect());
        }

        self.api(ar, namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error(e, ar, ""))
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = Self::name_of(obj)?;
        self.api(ar, obj.metadata.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(e, ar, name))
    }

    async fn replace(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = Self::name_of(obj)?;
        self.api(ar, obj.metadata.namespace.as_deref())
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error(e, ar, name))
    }

    async fn replace_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = Self::name_of(obj)?;
        let body = serde_json::to_vec(obj)?;
        self.api(ar, obj.metadata.namespace.as_deref())
            .replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error(e, ar, name))
    }

    async fn delete(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        self.api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, ar, name))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mirrored: Vec<String> = self.mirrors.keys().map(|(v, k)| format!("{v}/{k}")).collect();
        f.debug_struct("KubeStore").field("mirrored", &mirrored).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_error_mapping() {
        let ar = crate::crds::CatalogKind::Agent.api_resource();

        assert!(map_kube_error(api_error(404, "NotFound"), &ar, "a").is_not_found());
        assert!(matches!(
            map_kube_error(api_error(409, "AlreadyExists"), &ar, "a"),
            StoreError::AlreadyExists { .. }
        ));
        assert!(map_kube_error(api_error(409, "Conflict"), &ar, "a").is_conflict());
        assert!(matches!(
            map_kube_error(api_error(422, "Invalid"), &ar, "a"),
            StoreError::Invalid(_)
        ));
        assert!(map_kube_error(api_error(503, "ServiceUnavailable"), &ar, "a").is_unavailable());
    }

    #[test]
    fn test_rejected_credentials_are_retried() {
        let ar = crate::crds::kagent::RuntimeKind::McpServer.api_resource();

        for code in [401, 403] {
            let err = map_kube_error(api_error(code, "Forbidden"), &ar, "fs");
            assert!(err.is_forbidden());

            let err = crate::tasks::Error::from(err);
            assert!(!err.is_terminal());
            assert!(!err.is_store_unavailable());
        }
    }
}
