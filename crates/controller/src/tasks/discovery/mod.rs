//! Forward discovery: mirror resources running on configured environments
//! into local catalog entries.

pub mod scan;
pub mod trigger;

pub use trigger::DiscoveryTrigger;

use crate::crds::{set_condition, DiscoveryConfig, DiscoveryConfigStatus, EnvironmentStatus};
use crate::store::{get_as, modify_with_retry, ObjectKey, WriteTarget};
use crate::tasks::queue::{Action, Reconciler};
use crate::tasks::types::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use kube::core::ApiResource;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const CONDITION_CONNECTED: &str = "Connected";

pub struct DiscoveryReconciler {
    ctx: Arc<Context>,
}

impl DiscoveryReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run one discovery cycle for a DiscoveryConfig and write its status
    pub async fn run_cycle(&self, config: &DiscoveryConfig) -> Result<DiscoveryConfigStatus> {
        let now = chrono::Utc::now().to_rfc3339();
        let previous = config.status.clone().unwrap_or_default();
        let timeout = self.ctx.config.discovery.environment_timeout();

        let scans = config.spec.environments.iter().map(|environment| {
            let previous = previous.environment(&environment.name);
            let now = now.as_str();
            async move {
                if !environment.discovery_enabled {
                    debug!(environment = %environment.name, "Discovery disabled, skipping");
                    return Ok(disabled_status(&environment.name, previous));
                }
                match tokio::time::timeout(
                    timeout,
                    scan::scan_environment(&self.ctx, environment, previous, now),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(environment = %environment.name, ?timeout, "Discovery pass timed out");
                        self.ctx.connector.invalidate(&environment.name);
                        Ok(scan::disconnected(
                            environment,
                            previous,
                            format!("discovery timed out after {}s", timeout.as_secs()),
                        ))
                    }
                }
            }
        });

        let mut environments = Vec::with_capacity(config.spec.environments.len());
        for result in join_all(scans).await {
            environments.push(result?);
        }

        let mut status = DiscoveryConfigStatus {
            environments,
            conditions: previous.conditions.clone(),
            last_sync_time: Some(now.clone()),
            observed_generation: config.metadata.generation,
        };
        summarize(&mut status, config);
        Ok(status)
    }

    async fn write_status(&self, config: &DiscoveryConfig, status: &DiscoveryConfigStatus) -> Result<()> {
        let ar = ApiResource::erase::<DiscoveryConfig>(&());
        let value = serde_json::to_value(status)?;
        modify_with_retry(
            self.ctx.store.as_ref(),
            &ar,
            config.namespace().as_deref(),
            &config.name_any(),
            WriteTarget::Status,
            |obj| {
                if obj.data.get("status") == Some(&value) {
                    return Ok(false);
                }
                obj.data["status"] = value.clone();
                Ok(true)
            },
        )
        .await?;
        Ok(())
    }
}

/// Status of an environment with discovery switched off; keeps the last
/// observed values.
fn disabled_status(name: &str, previous: Option<&EnvironmentStatus>) -> EnvironmentStatus {
    EnvironmentStatus {
        name: name.to_string(),
        connected: previous.map(|p| p.connected).unwrap_or(false),
        last_sync_time: previous.and_then(|p| p.last_sync_time.clone()),
        discovered_resources: previous
            .map(|p| p.discovered_resources.clone())
            .unwrap_or_default(),
        message: Some("discovery disabled".to_string()),
    }
}

/// Top-level `Connected` condition over the environments that were scanned
fn summarize(status: &mut DiscoveryConfigStatus, config: &DiscoveryConfig) {
    let scanned: Vec<&EnvironmentStatus> = status
        .environments
        .iter()
        .filter(|e| {
            config
                .spec
                .environments
                .iter()
                .any(|env| env.name == e.name && env.discovery_enabled)
        })
        .collect();
    let connected = scanned.iter().filter(|e| e.connected).count();

    let (ok, reason, message) = if scanned.is_empty() {
        (false, "NoEnvironments", "no environments with discovery enabled".to_string())
    } else if connected == scanned.len() {
        (true, "AllConnected", format!("{connected} environment(s) connected"))
    } else {
        let failed: Vec<&str> = scanned
            .iter()
            .filter(|e| !e.connected)
            .map(|e| e.name.as_str())
            .collect();
        (
            false,
            "PartiallyConnected",
            format!("{connected}/{} connected; unreachable: {}", scanned.len(), failed.join(", ")),
        )
    };
    set_condition(&mut status.conditions, CONDITION_CONNECTED, ok, reason, message);
}

#[async_trait]
impl Reconciler for DiscoveryReconciler {
    fn name(&self) -> &'static str {
        "discovery"
    }

    #[instrument(skip(self), fields(config = %key))]
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(config) = get_as::<DiscoveryConfig>(self.ctx.store.as_ref(), key.namespace(), &key.name).await?
        else {
            debug!("DiscoveryConfig gone, nothing to do");
            return Ok(Action::await_change());
        };
        if config.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        info!(environments = config.spec.environments.len(), "🔍 Starting discovery cycle");
        let status = self.run_cycle(&config).await?;
        self.write_status(&config, &status).await?;

        Ok(Action::requeue(self.ctx.config.discovery.resync_interval()))
    }
}
