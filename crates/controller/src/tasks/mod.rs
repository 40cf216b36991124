use crate::connector::ClusterConnector;
use crate::crds::kagent::{Agent, MCPServer, ModelConfig, RuntimeKind};
use crate::crds::{CatalogKind, DiscoveryConfig, RegistryDeployment};
use crate::store::ResourceStore;
use futures::future::select_all;
use kube::core::ApiResource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub mod autodeploy;
pub mod catalog;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod naming;
pub mod queue;
pub mod reverse;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use discovery::DiscoveryTrigger;
pub use types::{Error, Result};

use autodeploy::AutoDeployEvaluator;
use catalog::versions::VersionReconciler;
use discovery::DiscoveryReconciler;
use queue::{Predicate, Reconciler, Runner, TriggerRequest};
use reverse::{ReverseDiscoveryReconciler, SkillDiscoveryReconciler};
use types::Context;

/// Load the controller configuration from the mounted file, falling back to
/// defaults when it cannot be read.
pub fn load_config() -> Result<ControllerConfig> {
    let path = ControllerConfig::config_path();
    debug!("Loading controller configuration from {}", path);

    let config = match ControllerConfig::from_mounted_file(&path) {
        Ok(cfg) => {
            debug!("Successfully loaded controller configuration");
            cfg
        }
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            ControllerConfig::default()
        }
    };

    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }
    debug!("Configuration validation passed");
    Ok(config)
}

/// Kinds the local store has to mirror for the controllers to see changes
pub fn watched_resources() -> Vec<ApiResource> {
    let mut resources = vec![
        ApiResource::erase::<DiscoveryConfig>(&()),
        ApiResource::erase::<RegistryDeployment>(&()),
    ];
    resources.extend(CatalogKind::ALL.iter().map(|kind| kind.api_resource()));
    resources.extend(RuntimeKind::ALL.iter().map(|kind| kind.api_resource()));
    resources
}

fn spawn<R: Reconciler>(runner: Runner<R>) -> (&'static str, JoinHandle<Result<()>>) {
    let name = runner.name();
    (name, tokio::spawn(runner.run()))
}

/// Main entry point for the registry controllers.
///
/// Runs until one controller stops, which only happens when the local store
/// stays unavailable; the error is returned so the process can exit.
#[instrument(skip_all, fields(namespace = %namespace))]
pub async fn run_registry_controllers(
    store: Arc<dyn ResourceStore>,
    connector: Arc<dyn ClusterConnector>,
    namespace: String,
    config: ControllerConfig,
    discovery_trigger: mpsc::Receiver<TriggerRequest>,
) -> Result<()> {
    info!("Starting registry controllers in namespace: {}", namespace);

    let ctx = Context::new(store.clone(), connector, namespace.clone(), config);
    let settings = &ctx.config;

    let mut controllers = Vec::new();

    controllers.push(spawn(
        Runner::new(
            Arc::new(DiscoveryReconciler::new(ctx.clone())),
            store.clone(),
            ApiResource::erase::<DiscoveryConfig>(&()),
        )
        .namespaced(&namespace)
        .predicate(Predicate::GenerationChanged)
        .resync_every(settings.discovery.resync_interval())
        .trigger(discovery_trigger)
        .concurrency(settings.discovery.concurrency)
        .settings(settings.runtime.clone()),
    ));

    for kind in CatalogKind::ALL {
        controllers.push(spawn(
            Runner::new(
                Arc::new(VersionReconciler::new(ctx.clone(), kind)),
                store.clone(),
                kind.api_resource(),
            )
            .namespaced(&namespace)
            .settings(settings.runtime.clone()),
        ));
    }

    controllers.push(spawn(
        Runner::new(
            Arc::new(ReverseDiscoveryReconciler::<MCPServer>::new(ctx.clone())),
            store.clone(),
            ApiResource::erase::<MCPServer>(&()),
        )
        .settings(settings.runtime.clone()),
    ));
    controllers.push(spawn(
        Runner::new(
            Arc::new(ReverseDiscoveryReconciler::<Agent>::new(ctx.clone())),
            store.clone(),
            ApiResource::erase::<Agent>(&()),
        )
        .settings(settings.runtime.clone()),
    ));
    controllers.push(spawn(
        Runner::new(
            Arc::new(ReverseDiscoveryReconciler::<ModelConfig>::new(ctx.clone())),
            store.clone(),
            ApiResource::erase::<ModelConfig>(&()),
        )
        .settings(settings.runtime.clone()),
    ));
    controllers.push(spawn(
        Runner::new(
            Arc::new(SkillDiscoveryReconciler::new(ctx.clone())),
            store.clone(),
            ApiResource::erase::<Agent>(&()),
        )
        .settings(settings.runtime.clone()),
    ));

    for kind in deploy::deployable_kinds() {
        controllers.push(spawn(
            Runner::new(
                Arc::new(AutoDeployEvaluator::new(ctx.clone(), kind)),
                store.clone(),
                kind.api_resource(),
            )
            .namespaced(&namespace)
            .concurrency(settings.auto_deploy.concurrency)
            .settings(settings.runtime.clone()),
        ));
    }

    controllers.push(spawn(deploy::runner(ctx.clone())));

    info!("{} controllers started", controllers.len());

    let (names, handles): (Vec<_>, Vec<_>) = controllers.into_iter().unzip();
    let (outcome, index, remaining) = select_all(handles).await;
    for handle in remaining {
        handle.abort();
    }

    let name = names[index];
    match outcome {
        Ok(Ok(())) => {
            info!("{} controller stopped, shutting down", name);
            Ok(())
        }
        Ok(Err(e)) => {
            error!("{} controller failed: {}", name, e);
            Err(e)
        }
        Err(e) => {
            error!("{} controller task join error: {:?}", name, e);
            Err(Error::Controller(format!("{name} controller panicked")))
        }
    }
}
