use super::*;
use crate::connector::{ConnectorError, MockClusterConnector};
use crate::crds::kagent::{MCPServer, RemoteMCPServer, RuntimeKind};
use crate::crds::{
    CatalogPayload, ClusterConfig, DiscoveryConfig, DiscoveryConfigSpec, Environment, Package,
    PublisherStatus, RegistryDeploymentSpec, ResourceType, ToolServerPayload, Transport,
};
use crate::store::{create_entry, get_entry, to_dynamic, InMemoryStore, ResourceStore};
use crate::tasks::config::ControllerConfig;
use crate::tasks::naming::ResourceNaming;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const NS: &str = "agentregistry";

fn mcp_ar() -> ApiResource {
    RuntimeKind::McpServer.api_resource()
}

fn deployment_ar() -> ApiResource {
    ApiResource::erase::<RegistryDeployment>(&())
}

fn fs_tools() -> CatalogEntry {
    let mut entry = CatalogEntry::new(
        "demo-fs-tools-1-0-0",
        NS,
        CatalogPayload::ToolServer(ToolServerPayload {
            name: "demo-fs-tools".to_string(),
            version: "1.0.0".to_string(),
            packages: vec![Package {
                registry_type: "oci".to_string(),
                identifier: "ghcr.io/demo/fs-tools:1.0.0".to_string(),
                transport: Transport {
                    transport_type: "stdio".to_string(),
                    ..Transport::default()
                },
                environment_variables: vec![crate::crds::KeyValueInput {
                    name: "LOG_LEVEL".to_string(),
                    value: "info".to_string(),
                    ..Default::default()
                }],
                ..Package::default()
            }],
            remotes: vec![Transport {
                transport_type: "streamable-http".to_string(),
                url: "https://fs-tools.example.com/mcp".to_string(),
                ..Transport::default()
            }],
            ..ToolServerPayload::default()
        }),
    );
    entry.status.publisher = Some(PublisherStatus {
        verified_publisher: true,
        verified_organization: true,
        ..PublisherStatus::default()
    });
    entry
}

fn request_name(version: &str) -> String {
    ResourceNaming::deployment_name("demo-fs-tools", version, ResourceType::Mcp)
}

fn request(config: &[(&str, &str)]) -> RegistryDeployment {
    request_for("1.0.0", config)
}

fn request_for(version: &str, config: &[(&str, &str)]) -> RegistryDeployment {
    let name = request_name(version);
    let mut request = RegistryDeployment::new(
        &name,
        RegistryDeploymentSpec {
            resource_name: "demo-fs-tools".to_string(),
            version: version.to_string(),
            resource_type: ResourceType::Mcp,
            runtime: "kubernetes".to_string(),
            config: config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..RegistryDeploymentSpec::default()
        },
    );
    request.metadata.namespace = Some(NS.to_string());
    request
}

fn key() -> ObjectKey {
    ObjectKey::namespaced(NS, &request_name("1.0.0"))
}

fn reconciler_with(store: Arc<InMemoryStore>, connector: MockClusterConnector, config: ControllerConfig) -> DeploymentReconciler {
    DeploymentReconciler::new(Context::new(store, Arc::new(connector), NS, config))
}

fn reconciler(store: Arc<InMemoryStore>) -> DeploymentReconciler {
    reconciler_with(store, MockClusterConnector::new(), ControllerConfig::default())
}

async fn seed(store: &InMemoryStore, entry: Option<CatalogEntry>, request: RegistryDeployment) {
    if let Some(entry) = entry {
        create_entry(store, &entry).await.unwrap();
    }
    store
        .create(&deployment_ar(), &to_dynamic(&request).unwrap())
        .await
        .unwrap();
}

async fn current(store: &InMemoryStore) -> RegistryDeployment {
    get_as::<RegistryDeployment>(store, Some(NS), &request_name("1.0.0"))
        .await
        .unwrap()
        .unwrap()
}

async fn status_of(store: &InMemoryStore) -> RegistryDeploymentStatus {
    current(store).await.status.unwrap_or_default()
}

async fn mark_ready(store: &InMemoryStore, ar: &ApiResource, namespace: &str, name: &str) {
    let mut obj = store.get(ar, Some(namespace), name).await.unwrap().unwrap();
    obj.data["status"] = json!({"conditions": [{"type": "Ready", "status": "True", "reason": "Running"}]});
    store.replace_status(ar, &obj).await.unwrap();
}

#[tokio::test]
async fn test_request_is_deployed_and_readiness_mirrored() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[("MAX_FILE_SIZE", "10")])).await;
    let reconciler = reconciler(store.clone());

    let action = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(action, Action::requeue(reconciler.ctx.config.deployment.observe_interval()));

    let request = current(&store).await;
    assert!(request.finalizers().iter().any(|f| f == FINALIZER));
    let status = request.status.unwrap();
    assert_eq!(status.phase, DeploymentPhase::Observing);
    assert!(!status.ready);
    assert_eq!(status.message.as_deref(), Some("Pending"));
    assert_eq!(status.namespace.as_deref(), Some("kagent"));
    assert_eq!(status.managed_resources.len(), 1);
    assert_eq!(status.managed_resources[0].kind, "MCPServer");

    let server: MCPServer = get_as(store.as_ref(), Some("kagent"), "demo-fs-tools")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.spec.deployment.image, "ghcr.io/demo/fs-tools:1.0.0");
    assert_eq!(server.spec.deployment.env.get("MAX_FILE_SIZE").map(String::as_str), Some("10"));
    assert_eq!(
        server.labels().get(LABEL_DEPLOYMENT_NAME).map(String::as_str),
        Some(request_name("1.0.0").as_str())
    );

    let entry = get_entry(store.as_ref(), CatalogKind::ToolServer, NS, "demo-fs-tools-1-0-0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status.management_type, Some(ManagementType::Managed));
    assert!(!entry.status.deployment.as_ref().unwrap().ready);

    mark_ready(&store, &mcp_ar(), "kagent", "demo-fs-tools").await;
    let action = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = status_of(&store).await;
    assert_eq!(status.phase, DeploymentPhase::Running);
    assert!(status.ready);
    assert_eq!(status.message, None);
    assert!(status.deployed_at.is_some());

    let deployment = get_entry(store.as_ref(), CatalogKind::ToolServer, NS, "demo-fs-tools-1-0-0")
        .await
        .unwrap()
        .unwrap()
        .status
        .deployment
        .unwrap();
    assert!(deployment.ready);
    assert_eq!(deployment.namespace.as_deref(), Some("kagent"));
    assert_eq!(deployment.service_name.as_deref(), Some("demo-fs-tools"));
}

#[tokio::test]
async fn test_unchanged_observation_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let reconciler = reconciler(store.clone());
    reconciler.reconcile(&key()).await.unwrap();
    mark_ready(&store, &mcp_ar(), "kagent", "demo-fs-tools").await;
    reconciler.reconcile(&key()).await.unwrap();

    let before = current(&store).await.metadata.resource_version;
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(current(&store).await.metadata.resource_version, before);
}

#[tokio::test]
async fn test_deleting_request_removes_runtime_resources() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let reconciler = reconciler(store.clone());
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 1);

    store
        .delete(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap();
    assert!(current(&store).await.metadata.deletion_timestamp.is_some());

    reconciler.reconcile(&key()).await.unwrap();

    assert_eq!(store.count(&mcp_ar()).await, 0);
    assert_eq!(store.count(&deployment_ar()).await, 0);
    let entry = get_entry(store.as_ref(), CatalogKind::ToolServer, NS, "demo-fs-tools-1-0-0")
        .await
        .unwrap()
        .unwrap();
    assert!(entry.status.deployment.is_none());
}

#[tokio::test]
async fn test_deleting_already_removed_runtime_resource_is_fine() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let reconciler = reconciler(store.clone());
    reconciler.reconcile(&key()).await.unwrap();

    store.delete(&mcp_ar(), Some("kagent"), "demo-fs-tools").await.unwrap();
    store
        .delete(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    assert_eq!(store.count(&deployment_ar()).await, 0);
}

#[tokio::test]
async fn test_missing_runtime_resource_is_reported_and_recreated() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let reconciler = reconciler(store.clone());
    reconciler.reconcile(&key()).await.unwrap();

    let status = status_of(&store).await;
    let observed = observe::readiness(store.as_ref(), &status.managed_resources).await;
    assert_eq!(observed, (false, "Pending".to_string()));

    store.delete(&mcp_ar(), Some("kagent"), "demo-fs-tools").await.unwrap();
    let observed = observe::readiness(store.as_ref(), &status.managed_resources).await;
    assert_eq!(
        observed,
        (false, "Managed MCPServer kagent/demo-fs-tools not found - will recreate".to_string())
    );

    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 1);
}

#[tokio::test]
async fn test_missing_catalog_entry_backs_off_then_fails() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, None, request(&[])).await;
    let mut config = ControllerConfig::default();
    config.deployment.max_resolve_attempts = 2;
    let reconciler = reconciler_with(store.clone(), MockClusterConnector::new(), config);

    let action = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(action, Action::requeue(reconciler.ctx.config.deployment.resolve_backoff(1)));
    let status = status_of(&store).await;
    assert_eq!(status.reason.as_deref(), Some(REASON_CATALOG_NOT_FOUND));
    assert_eq!(status.resolve_attempts, 1);

    let action = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(action, Action::await_change());
    let status = status_of(&store).await;
    assert_eq!(status.phase, DeploymentPhase::Failed);
    assert_eq!(status.resolve_attempts, 2);
    assert!(status.message.unwrap().contains("after 2 attempts"));

    // Terminal until the request spec changes, even once the entry shows up
    create_entry(store.as_ref(), &fs_tools()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 0);

    let mut obj = store
        .get(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap()
        .unwrap();
    obj.data["spec"]["config"] = json!({"RETRY": "1"});
    store.replace(&deployment_ar(), &obj).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    let status = status_of(&store).await;
    assert_eq!(status.resolve_attempts, 0);
    assert_eq!(status.phase, DeploymentPhase::Observing);
    assert_eq!(store.count(&mcp_ar()).await, 1);
}

#[tokio::test]
async fn test_runner_waits_out_resolve_backoff() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, None, request(&[])).await;
    let mut config = ControllerConfig::default();
    config.deployment.resolve_backoff_base_seconds = 1;
    config.deployment.resolve_backoff_max_seconds = 1;
    let ctx = Context::new(store.clone(), Arc::new(MockClusterConnector::new()), NS, config);
    let handle = tokio::spawn(runner(ctx).run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = status_of(&store).await;
    assert_eq!(status.resolve_attempts, 1);
    assert_eq!(status.reason.as_deref(), Some(REASON_CATALOG_NOT_FOUND));
    assert!(status.message.unwrap().contains("attempt 1/8"));

    // The entry appearing later is picked up by the next backoff retry
    create_entry(store.as_ref(), &fs_tools()).await.unwrap();
    let deployed = async {
        while status_of(&store).await.managed_resources.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), deployed)
        .await
        .expect("request should deploy once its entry exists");

    let status = status_of(&store).await;
    assert_eq!(status.resolve_attempts, 0);
    assert_eq!(status.phase, DeploymentPhase::Observing);
    assert_eq!(store.count(&mcp_ar()).await, 1);
    handle.abort();
}

#[tokio::test]
async fn test_unverified_publisher_blocks_deployment() {
    let store = Arc::new(InMemoryStore::new());
    let mut entry = fs_tools();
    entry.status.publisher = None;
    seed(&store, Some(entry), request(&[])).await;

    let action = reconciler(store.clone()).reconcile(&key()).await.unwrap();

    assert_eq!(action, Action::await_change());
    let status = status_of(&store).await;
    assert_eq!(status.phase, DeploymentPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some(REASON_VALIDATION));
    assert!(status.message.unwrap().starts_with("deployment blocked for demo-fs-tools 1.0.0"));
    assert_eq!(store.count(&mcp_ar()).await, 0);
}

#[tokio::test]
async fn test_publisher_gate_can_be_disabled() {
    let store = Arc::new(InMemoryStore::new());
    let mut entry = fs_tools();
    entry.status.publisher = None;
    seed(&store, Some(entry), request(&[])).await;
    let mut config = ControllerConfig::default();
    config.deployment.require_verified_publisher = false;

    reconciler_with(store.clone(), MockClusterConnector::new(), config)
        .reconcile(&key())
        .await
        .unwrap();

    assert_eq!(store.count(&mcp_ar()).await, 1);
}

#[tokio::test]
async fn test_switching_to_remote_replaces_runtime_kind() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let reconciler = reconciler(store.clone());
    reconciler.reconcile(&key()).await.unwrap();

    let mut obj = store
        .get(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap()
        .unwrap();
    obj.data["spec"]["preferRemote"] = json!(true);
    store.replace(&deployment_ar(), &obj).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    assert_eq!(store.count(&mcp_ar()).await, 0);
    let remote: RemoteMCPServer = get_as(store.as_ref(), Some("kagent"), "demo-fs-tools")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(remote.spec.url, "https://fs-tools.example.com/mcp");
    let status = status_of(&store).await;
    assert_eq!(status.managed_resources.len(), 1);
    assert_eq!(status.managed_resources[0].kind, "RemoteMCPServer");
}

async fn seed_environment(store: &InMemoryStore, deploy_enabled: bool) {
    let mut config = DiscoveryConfig::new(
        "fleet",
        DiscoveryConfigSpec {
            environments: vec![Environment {
                name: "staging".to_string(),
                deploy_enabled,
                cluster: ClusterConfig {
                    name: "staging-gke".to_string(),
                    namespace: Some("agents".to_string()),
                    ..ClusterConfig::default()
                },
                ..Environment::default()
            }],
        },
    );
    config.metadata.namespace = Some(NS.to_string());
    store
        .create(&ApiResource::erase::<DiscoveryConfig>(&()), &to_dynamic(&config).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remote_environment_deploys_through_connector() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(InMemoryStore::new());
    seed_environment(&store, true).await;
    let mut request = request(&[]);
    request.spec.environment = Some("staging".to_string());
    seed(&store, Some(fs_tools()), request).await;

    let mut connector = MockClusterConnector::new();
    let remote_store = remote.clone();
    connector
        .expect_connect()
        .returning(move |_| Ok(remote_store.clone() as Arc<dyn ResourceStore>));
    let reconciler = reconciler_with(store.clone(), connector, ControllerConfig::default());

    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 0);
    assert_eq!(remote.count(&mcp_ar()).await, 1);
    let status = status_of(&store).await;
    assert_eq!(status.namespace.as_deref(), Some("agents"));
    assert_eq!(status.managed_resources[0].cluster.as_deref(), Some("staging-gke"));

    mark_ready(&remote, &mcp_ar(), "agents", "demo-fs-tools").await;
    let action = reconciler.reconcile(&key()).await.unwrap();
    assert!(status_of(&store).await.ready);
    // Remote resources are not watched, so keep polling
    assert_eq!(action, Action::requeue(reconciler.ctx.config.deployment.observe_interval()));

    store
        .delete(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(remote.count(&mcp_ar()).await, 0);
    assert_eq!(store.count(&deployment_ar()).await, 0);
}

#[tokio::test]
async fn test_failed_request_keeps_retrying_cleanup() {
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(InMemoryStore::new());
    seed_environment(&store, true).await;
    let mut request = request(&[]);
    request.spec.environment = Some("staging".to_string());
    seed(&store, Some(fs_tools()), request).await;

    let mut connector = MockClusterConnector::new();
    let remote_store = remote.clone();
    connector
        .expect_connect()
        .returning(move |_| Ok(remote_store.clone() as Arc<dyn ResourceStore>));
    let reconciler = reconciler_with(store.clone(), connector, ControllerConfig::default());
    let retry = Action::requeue(reconciler.ctx.config.deployment.observe_interval());

    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(remote.count(&mcp_ar()).await, 1);

    // Publisher loses verification while the remote cluster is unreachable
    crate::store::update_entry_status(store.as_ref(), CatalogKind::ToolServer, NS, "demo-fs-tools-1-0-0", |e| {
        e.status.publisher = None;
        true
    })
    .await
    .unwrap();
    remote.set_unavailable(true);

    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), retry);
    let status = status_of(&store).await;
    assert_eq!(status.phase, DeploymentPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some(REASON_VALIDATION));
    assert_eq!(status.managed_resources.len(), 1);

    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), retry);

    remote.set_unavailable(false);
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Action::await_change());
    assert_eq!(remote.count(&mcp_ar()).await, 0);
    let status = status_of(&store).await;
    assert!(status.managed_resources.is_empty());
    assert_eq!(status.phase, DeploymentPhase::Failed);
}

#[tokio::test]
async fn test_versions_do_not_share_runtime_resources() {
    let store = Arc::new(InMemoryStore::new());
    seed(&store, Some(fs_tools()), request(&[])).await;
    let mut v2 = fs_tools();
    v2.metadata.name = Some("demo-fs-tools-2-0-0".to_string());
    if let CatalogPayload::ToolServer(payload) = &mut v2.spec {
        payload.version = "2.0.0".to_string();
    }
    seed(&store, Some(v2), request_for("2.0.0", &[])).await;
    let v2_key = ObjectKey::namespaced(NS, &request_name("2.0.0"));
    let reconciler = reconciler(store.clone());

    reconciler.reconcile(&key()).await.unwrap();

    let err = reconciler.reconcile(&v2_key).await.unwrap_err();
    assert!(matches!(err, crate::tasks::types::Error::Conflict(_)));
    assert!(!err.is_terminal());
    let v2_status = get_as::<RegistryDeployment>(store.as_ref(), Some(NS), &request_name("2.0.0"))
        .await
        .unwrap()
        .unwrap()
        .status
        .unwrap();
    assert_eq!(v2_status.reason.as_deref(), Some(REASON_APPLY_FAILED));
    assert!(v2_status.managed_resources.is_empty());

    let server = store.get(&mcp_ar(), Some("kagent"), "demo-fs-tools").await.unwrap().unwrap();
    assert_eq!(apply::owning_request(&server), Some(key()));

    // A stray delete on behalf of v2 leaves v1's resource alone
    let managed = status_of(&store).await.managed_resources;
    apply::delete(store.as_ref(), &v2_key, &managed[0]).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 1);

    store
        .delete(&deployment_ar(), Some(NS), &request_name("1.0.0"))
        .await
        .unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.count(&mcp_ar()).await, 0);

    reconciler.reconcile(&v2_key).await.unwrap();
    let server = store.get(&mcp_ar(), Some("kagent"), "demo-fs-tools").await.unwrap().unwrap();
    assert_eq!(apply::owning_request(&server), Some(v2_key));
}

#[tokio::test]
async fn test_environment_without_deployments_fails_validation() {
    let store = Arc::new(InMemoryStore::new());
    seed_environment(&store, false).await;
    let mut request = request(&[]);
    request.spec.environment = Some("staging".to_string());
    seed(&store, Some(fs_tools()), request).await;
    let mut connector = MockClusterConnector::new();
    connector.expect_connect().never();

    reconciler_with(store.clone(), connector, ControllerConfig::default())
        .reconcile(&key())
        .await
        .unwrap();

    let status = status_of(&store).await;
    assert_eq!(status.phase, DeploymentPhase::Failed);
    assert_eq!(status.reason.as_deref(), Some(REASON_VALIDATION));
    assert!(status.message.unwrap().contains("deployEnabled is false"));
}

#[tokio::test]
async fn test_unreachable_environment_is_retried() {
    let store = Arc::new(InMemoryStore::new());
    seed_environment(&store, true).await;
    let mut request = request(&[]);
    request.spec.environment = Some("staging".to_string());
    seed(&store, Some(fs_tools()), request).await;
    let mut connector = MockClusterConnector::new();
    connector.expect_connect().returning(|env| {
        Err(ConnectorError::Timeout {
            environment: env.name.clone(),
            seconds: 15,
        })
    });

    let err = reconciler_with(store.clone(), connector, ControllerConfig::default())
        .reconcile(&key())
        .await
        .unwrap_err();

    assert!(!err.is_terminal());
    let status = status_of(&store).await;
    assert_eq!(status.reason.as_deref(), Some(REASON_TARGET_UNAVAILABLE));
    assert!(status.message.unwrap().starts_with("Failed to resolve target"));
}

#[test]
fn test_owner_of_maps_labels_to_request() {
    let mut obj = kube::core::DynamicObject::new("demo-fs-tools", &mcp_ar()).within("kagent");
    obj.metadata.labels = Some(BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (LABEL_DEPLOYMENT_NAME.to_string(), request_name("1.0.0")),
        (LABEL_DEPLOYMENT_NAMESPACE.to_string(), NS.to_string()),
    ]));
    let event = StoreEvent::from_object(&obj, &mcp_ar(), false);
    assert_eq!(owner_of(&event), vec![key()]);

    obj.metadata.labels = Some(BTreeMap::from([(
        LABEL_DEPLOYMENT_NAME.to_string(),
        request_name("1.0.0"),
    )]));
    let event = StoreEvent::from_object(&obj, &mcp_ar(), false);
    assert!(owner_of(&event).is_empty());
}
