//! Work queue and controller runner.
//!
//! Mirrors the shape of `kube::runtime::Controller` but runs on top of
//! [`ResourceStore`] change events, so the same reconcilers drive both the API
//! server backed store and the in-memory one.

use crate::store::{ObjectKey, ResourceStore, StoreEvent};
use crate::tasks::config::RuntimeSettings;
use crate::tasks::types::{Error, Result};
use async_trait::async_trait;
use kube::core::ApiResource;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

/// What to do with a key after reconciling it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;

    /// Decide how to retry after a failed reconcile.
    /// `failures` counts consecutive failures of this key.
    fn error_policy(&self, _key: &ObjectKey, error: &Error, _failures: u32, backoff: Duration) -> Action {
        if error.is_terminal() {
            Action::await_change()
        } else {
            Action::requeue(backoff)
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    active: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    shutdown: bool,
}

/// Deduplicating queue that never hands out the same key twice at once.
///
/// A key added while it is being processed is marked dirty and re-queued
/// when [`WorkQueue::done`] is called for it.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return;
        }
        if state.active.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Next key to process, or `None` after shutdown
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.active.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Maps a change of a watched kind to the primary keys it affects
pub type KeyMapper = Arc<dyn Fn(&StoreEvent) -> Vec<ObjectKey> + Send + Sync>;

/// Which primary changes enqueue work
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predicate {
    AnyChange,
    /// Spec changes only; status writes by the reconciler itself are ignored
    GenerationChanged,
}

/// Out-of-band request: one key, or every primary record when `None`
pub type TriggerRequest = Option<ObjectKey>;

struct Primary {
    resource: ApiResource,
    namespace: Option<String>,
    predicate: Predicate,
}

/// Builder and driver for one reconciler
pub struct Runner<R: Reconciler> {
    reconciler: Arc<R>,
    store: Arc<dyn ResourceStore>,
    primary: Primary,
    watches: Vec<(ApiResource, KeyMapper)>,
    resync: Option<Duration>,
    trigger: Option<mpsc::Receiver<TriggerRequest>>,
    concurrency: usize,
    settings: RuntimeSettings,
}

impl<R: Reconciler> Runner<R> {
    pub fn new(reconciler: Arc<R>, store: Arc<dyn ResourceStore>, primary: ApiResource) -> Self {
        Self {
            reconciler,
            store,
            primary: Primary {
                resource: primary,
                namespace: None,
                predicate: Predicate::AnyChange,
            },
            watches: Vec::new(),
            resync: None,
            trigger: None,
            concurrency: 1,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    /// Restrict the primary kind to one namespace
    pub fn namespaced(mut self, namespace: &str) -> Self {
        self.primary.namespace = Some(namespace.to_string());
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.primary.predicate = predicate;
        self
    }

    pub fn watches(mut self, resource: ApiResource, mapper: KeyMapper) -> Self {
        self.watches.push((resource, mapper));
        self
    }

    pub fn resync_every(mut self, interval: Duration) -> Self {
        self.resync = Some(interval);
        self
    }

    pub fn trigger(mut self, receiver: mpsc::Receiver<TriggerRequest>) -> Self {
        self.trigger = Some(receiver);
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run until the local store stays unavailable past the configured limit
    pub async fn run(self) -> Result<()> {
        let Runner {
            reconciler,
            store,
            primary,
            watches,
            resync,
            trigger,
            concurrency,
            settings,
        } = self;
        let name = reconciler.name();
        info!("🚀 Starting {} controller (workers={})", name, concurrency);

        let queue = WorkQueue::new();
        let primary = Arc::new(primary);
        let events = store.subscribe();

        let generations = enqueue_all(store.as_ref(), &primary, &queue).await?;

        let mut background = Vec::new();
        background.push(tokio::spawn(pump_events(
            events,
            store.clone(),
            primary.clone(),
            watches,
            queue.clone(),
            generations,
        )));
        if let Some(interval) = resync {
            let store = store.clone();
            let primary = primary.clone();
            let queue = queue.clone();
            background.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    debug!(kind = %primary.resource.kind, "Periodic resync");
                    if let Err(e) = enqueue_all(store.as_ref(), &primary, &queue).await {
                        warn!(kind = %primary.resource.kind, error = %e, "Resync list failed");
                    }
                }
            }));
        }
        if let Some(mut receiver) = trigger {
            let store = store.clone();
            let primary = primary.clone();
            let queue = queue.clone();
            background.push(tokio::spawn(async move {
                while let Some(request) = receiver.recv().await {
                    match request {
                        Some(key) => queue.add(key).await,
                        None => {
                            if let Err(e) = enqueue_all(store.as_ref(), &primary, &queue).await {
                                warn!(kind = %primary.resource.kind, error = %e, "Triggered list failed");
                            }
                        }
                    }
                }
            }));
        }

        let workers = Arc::new(Semaphore::new(concurrency));
        let failures: Arc<Mutex<HashMap<ObjectKey, u32>>> = Arc::default();
        let store_outages = Arc::new(AtomicU32::new(0));
        let fatal = Arc::new(Notify::new());
        let settings = Arc::new(settings);

        let outcome = loop {
            let key = tokio::select! {
                key = queue.next() => key,
                () = fatal.notified() => break Err(Error::Store(crate::store::StoreError::Unavailable(
                    format!("{name}: local store unavailable after {} consecutive failures",
                        settings.max_consecutive_store_failures),
                ))),
            };
            let Some(key) = key else {
                break Ok(());
            };
            let Ok(permit) = workers.clone().acquire_owned().await else {
                break Ok(());
            };

            let reconciler = reconciler.clone();
            let queue = queue.clone();
            let failures = failures.clone();
            let store_outages = store_outages.clone();
            let fatal = fatal.clone();
            let settings = settings.clone();
            let span = tracing::info_span!("reconcile", controller = name, key = %key);
            tokio::spawn(
                async move {
                    let result = reconciler.reconcile(&key).await;
                    let action = match result {
                        Ok(action) => {
                            failures.lock().await.remove(&key);
                            store_outages.store(0, Ordering::SeqCst);
                            action
                        }
                        Err(e) => {
                            let count = {
                                let mut failures = failures.lock().await;
                                let count = failures.entry(key.clone()).or_insert(0);
                                *count += 1;
                                *count
                            };
                            if e.is_store_unavailable() {
                                let outages = store_outages.fetch_add(1, Ordering::SeqCst) + 1;
                                if outages >= settings.max_consecutive_store_failures {
                                    error!(error = %e, outages, "Local store unavailable, stopping controller");
                                    fatal.notify_one();
                                }
                            }
                            error!(error = %e, failures = count, "Reconciliation error");
                            reconciler.error_policy(&key, &e, count, settings.error_backoff(count))
                        }
                    };
                    if let Some(delay) = action.requeue_after() {
                        queue.add_after(key.clone(), delay);
                    }
                    queue.done(&key).await;
                    drop(permit);
                }
                .instrument(span),
            );
        };

        queue.shutdown().await;
        for task in background {
            task.abort();
        }
        info!("{} controller stopped", name);
        outcome
    }
}

/// Enqueue every primary record; returns the generation each one was listed at
async fn enqueue_all(
    store: &dyn ResourceStore,
    primary: &Primary,
    queue: &WorkQueue,
) -> Result<HashMap<ObjectKey, i64>> {
    let objects = store
        .list(&primary.resource, primary.namespace.as_deref())
        .await?;
    let mut generations = HashMap::with_capacity(objects.len());
    for obj in &objects {
        let key = ObjectKey::of(obj);
        generations.insert(key.clone(), obj.metadata.generation.unwrap_or_default());
        queue.add(key).await;
    }
    Ok(generations)
}

async fn pump_events(
    mut events: tokio::sync::broadcast::Receiver<StoreEvent>,
    store: Arc<dyn ResourceStore>,
    primary: Arc<Primary>,
    watches: Vec<(ApiResource, KeyMapper)>,
    queue: Arc<WorkQueue>,
    mut generations: HashMap<ObjectKey, i64>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(kind = %primary.resource.kind, skipped, "Event stream lagged, relisting");
                if let Err(e) = enqueue_all(store.as_ref(), &primary, &queue).await {
                    warn!(error = %e, "Relist after lag failed");
                }
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        if event.is_for(&primary.resource) {
            let in_scope = primary
                .namespace
                .as_deref()
                .map_or(true, |ns| event.key.namespace() == Some(ns));
            if in_scope && passes(&primary.predicate, &event, &mut generations) {
                queue.add(event.key.clone()).await;
            }
        }

        for (resource, mapper) in &watches {
            if event.is_for(resource) {
                for key in mapper(&event) {
                    queue.add(key).await;
                }
            }
        }
    }
}

fn passes(predicate: &Predicate, event: &StoreEvent, generations: &mut HashMap<ObjectKey, i64>) -> bool {
    if event.deleted {
        generations.remove(&event.key);
        return true;
    }
    if event.deleting || *predicate == Predicate::AnyChange {
        return true;
    }
    let generation = event.generation.unwrap_or_default();
    match generations.insert(event.key.clone(), generation) {
        Some(previous) => previous != generation,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::CatalogKind;
    use crate::store::InMemoryStore;
    use kube::core::DynamicObject;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        fail_with_outage: bool,
    }

    #[async_trait]
    impl Reconciler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn reconcile(&self, _key: &ObjectKey) -> Result<Action> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_outage {
                return Err(Error::Store(crate::store::StoreError::Unavailable("down".into())));
            }
            Ok(Action::await_change())
        }
    }

    #[tokio::test]
    async fn test_queue_dedupes_pending_keys() {
        let queue = WorkQueue::new();
        let key = ObjectKey::namespaced("ns", "a");
        queue.add(key.clone()).await;
        queue.add(key.clone()).await;
        assert_eq!(queue.len().await, 1);

        assert_eq!(queue.next().await, Some(key.clone()));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_added_while_active_is_requeued_once_done() {
        let queue = WorkQueue::new();
        let key = ObjectKey::namespaced("ns", "a");
        queue.add(key.clone()).await;
        let active = queue.next().await.unwrap();

        queue.add(key.clone()).await;
        assert!(queue.is_empty().await);

        queue.done(&active).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown().await;
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn test_generation_predicate_ignores_status_only_events() {
        let mut generations = HashMap::new();
        let mut event = StoreEvent {
            api_version: "v1".into(),
            kind: "X".into(),
            key: ObjectKey::namespaced("ns", "a"),
            generation: Some(1),
            deleting: false,
            deleted: false,
            labels: Default::default(),
        };
        assert!(passes(&Predicate::GenerationChanged, &event, &mut generations));
        assert!(!passes(&Predicate::GenerationChanged, &event, &mut generations));
        event.generation = Some(2);
        assert!(passes(&Predicate::GenerationChanged, &event, &mut generations));
        event.deleting = true;
        assert!(passes(&Predicate::GenerationChanged, &event, &mut generations));
    }

    #[tokio::test]
    async fn test_runner_reconciles_existing_and_new_records() {
        let store = Arc::new(InMemoryStore::new());
        let ar = CatalogKind::Agent.api_resource();
        let mut obj = DynamicObject::new("first", &ar).within("agentregistry");
        obj.data = serde_json::json!({"spec": {}});
        store.create(&ar, &obj).await.unwrap();

        let reconciler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with_outage: false,
        });
        let runner = Runner::new(reconciler.clone(), store.clone(), ar.clone());
        let handle = tokio::spawn(runner.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut second = DynamicObject::new("second", &ar).within("agentregistry");
        second.data = serde_json::json!({"spec": {}});
        store.create(&ar, &second).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(reconciler.calls.load(Ordering::SeqCst) >= 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_runner_stops_after_repeated_store_outages() {
        let store = Arc::new(InMemoryStore::new());
        let ar = CatalogKind::Agent.api_resource();
        let mut obj = DynamicObject::new("first", &ar).within("agentregistry");
        obj.data = serde_json::json!({"spec": {}});
        store.create(&ar, &obj).await.unwrap();

        let reconciler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail_with_outage: true,
        });
        let settings = RuntimeSettings {
            max_consecutive_store_failures: 3,
            error_backoff_base_millis: 1,
            error_backoff_max_seconds: 1,
            ..RuntimeSettings::default()
        };
        let runner = Runner::new(reconciler, store, ar).settings(settings);

        let result = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .expect("runner should stop on its own");
        assert!(result.unwrap_err().is_store_unavailable());
    }
}
