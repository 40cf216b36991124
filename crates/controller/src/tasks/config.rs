//! Controller Configuration
//!
//! Loaded from the mounted `config.yaml`. Every section falls back to defaults
//! that honour the controller's environment variables, so a partial file (or no
//! file at all) still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

fn env_or<T: FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub connector: ConnectorSettings,

    #[serde(default)]
    pub deployment: DeploymentSettings,

    #[serde(default)]
    pub auto_deploy: AutoDeploySettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Discovery reconciler settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySettings {
    /// Full rescan interval (`DISCOVERY_RESYNC_INTERVAL`)
    pub resync_interval_seconds: u64,

    /// Time limit for scanning one environment (`DISCOVERY_ENVIRONMENT_TIMEOUT`)
    pub environment_timeout_seconds: u64,

    /// DiscoveryConfigs processed in parallel
    pub concurrency: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            resync_interval_seconds: env_or("DISCOVERY_RESYNC_INTERVAL", 300),
            environment_timeout_seconds: env_or("DISCOVERY_ENVIRONMENT_TIMEOUT", 60),
            concurrency: 2,
        }
    }
}

impl DiscoverySettings {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    pub fn environment_timeout(&self) -> Duration {
        Duration::from_secs(self.environment_timeout_seconds)
    }
}

/// Which credential strategies the connector may use
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    #[default]
    Auto,
    Static,
    WorkloadIdentity,
}

impl FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(CredentialMode::Auto),
            "static" => Ok(CredentialMode::Static),
            "workload-identity" | "workload_identity" | "workloadidentity" => {
                Ok(CredentialMode::WorkloadIdentity)
            }
            other => Err(format!("unknown credential mode '{other}'")),
        }
    }
}

/// Environment connector settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSettings {
    /// `CLUSTER_CREDENTIAL_MODE`
    pub credential_mode: CredentialMode,

    /// Lifetime of a cached cluster handle
    pub cache_ttl_seconds: u64,

    /// Timeout for each credential exchange call
    pub request_timeout_seconds: u64,

    /// GCE metadata server base URL
    pub metadata_url: String,

    /// GKE API base URL
    pub gke_api_url: String,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            credential_mode: env_or("CLUSTER_CREDENTIAL_MODE", CredentialMode::Auto),
            cache_ttl_seconds: 30 * 60,
            request_timeout_seconds: 15,
            metadata_url: "http://metadata.google.internal".to_string(),
            gke_api_url: "https://container.googleapis.com".to_string(),
        }
    }
}

impl ConnectorSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Deployment reconciler settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSettings {
    /// Namespace used when a request names none (`DEPLOYMENT_DEFAULT_NAMESPACE`)
    pub default_namespace: String,

    /// Refuse entries without verified publisher identity
    pub require_verified_publisher: bool,

    pub resolve_backoff_base_seconds: u64,

    pub resolve_backoff_max_seconds: u64,

    /// Catalog lookups before a request fails with `CatalogNotFound`
    pub max_resolve_attempts: u32,

    /// Requeue interval while runtime resources are not ready
    pub observe_interval_seconds: u64,

    pub concurrency: usize,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            default_namespace: env_string("DEPLOYMENT_DEFAULT_NAMESPACE")
                .unwrap_or_else(|| "kagent".to_string()),
            require_verified_publisher: true,
            resolve_backoff_base_seconds: 5,
            resolve_backoff_max_seconds: 300,
            max_resolve_attempts: 8,
            observe_interval_seconds: 30,
            concurrency: 4,
        }
    }
}

impl DeploymentSettings {
    /// `base * 2^attempts`, capped
    pub fn resolve_backoff(&self, attempts: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempts.min(20));
        let secs = self
            .resolve_backoff_base_seconds
            .saturating_mul(factor)
            .min(self.resolve_backoff_max_seconds);
        Duration::from_secs(secs)
    }

    pub fn observe_interval(&self) -> Duration {
        Duration::from_secs(self.observe_interval_seconds)
    }
}

/// Auto-deployment evaluator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoDeploySettings {
    pub enabled: bool,

    /// Target when neither label nor provenance names one (`AUTO_DEPLOY_DEFAULT_ENVIRONMENT`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,

    pub concurrency: usize,
}

impl Default for AutoDeploySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_environment: env_string("AUTO_DEPLOY_DEFAULT_ENVIRONMENT"),
            concurrency: 4,
        }
    }
}

/// Work queue runtime settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    /// Consecutive local store outages before a controller gives up
    pub max_consecutive_store_failures: u32,

    pub error_backoff_base_millis: u64,

    pub error_backoff_max_seconds: u64,

    /// Time allowed for the initial watch list of each mirrored kind
    pub mirror_sync_timeout_seconds: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_consecutive_store_failures: 10,
            error_backoff_base_millis: 500,
            error_backoff_max_seconds: 300,
            mirror_sync_timeout_seconds: 120,
        }
    }
}

impl RuntimeSettings {
    /// Exponential backoff for the n-th consecutive failure of one key
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let factor = 2u64.saturating_pow(failures.saturating_sub(1).min(20));
        let millis = self
            .error_backoff_base_millis
            .saturating_mul(factor)
            .min(self.error_backoff_max_seconds.saturating_mul(1000));
        Duration::from_millis(millis)
    }

    pub fn mirror_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_sync_timeout_seconds)
    }
}

impl ControllerConfig {
    /// Validate that the configuration can drive the controllers
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.discovery.resync_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "discovery.resyncIntervalSeconds must be greater than zero"
            ));
        }
        if self.discovery.environment_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "discovery.environmentTimeoutSeconds must be greater than zero"
            ));
        }
        if self.deployment.default_namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("deployment.defaultNamespace must not be empty"));
        }
        if self.deployment.max_resolve_attempts == 0 {
            return Err(anyhow::anyhow!(
                "deployment.maxResolveAttempts must be at least 1"
            ));
        }
        if self.deployment.resolve_backoff_base_seconds > self.deployment.resolve_backoff_max_seconds {
            return Err(anyhow::anyhow!(
                "deployment.resolveBackoffBaseSeconds exceeds resolveBackoffMaxSeconds"
            ));
        }
        if [
            self.discovery.concurrency,
            self.deployment.concurrency,
            self.auto_deploy.concurrency,
        ]
        .contains(&0)
        {
            return Err(anyhow::anyhow!("controller concurrency must be at least 1"));
        }
        if self.runtime.max_consecutive_store_failures == 0 {
            return Err(anyhow::anyhow!(
                "runtime.maxConsecutiveStoreFailures must be at least 1"
            ));
        }
        for (field, url) in [
            ("connector.metadataUrl", &self.connector.metadata_url),
            ("connector.gkeApiUrl", &self.connector.gke_api_url),
        ] {
            reqwest::Url::parse(url)
                .map_err(|e| anyhow::anyhow!("{field} is not a valid URL ({url}): {e}"))?;
        }
        Ok(())
    }

    /// Load configuration from mounted `ConfigMap` file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Path from `CONTROLLER_CONFIG_PATH`, else the mounted default
    pub fn config_path() -> String {
        env_string("CONTROLLER_CONFIG_PATH").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_partial_yaml_uses_defaults() {
        std::env::remove_var("DEPLOYMENT_DEFAULT_NAMESPACE");
        let yaml = r#"
discovery:
  resyncIntervalSeconds: 120
  environmentTimeoutSeconds: 30
  concurrency: 1
deployment:
  defaultNamespace: agents
  requireVerifiedPublisher: false
  resolveBackoffBaseSeconds: 2
  resolveBackoffMaxSeconds: 60
  maxResolveAttempts: 3
  observeIntervalSeconds: 10
  concurrency: 2
"#;
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.discovery.resync_interval(), Duration::from_secs(120));
        assert_eq!(config.deployment.default_namespace, "agents");
        assert!(!config.deployment.require_verified_publisher);
        assert_eq!(config.connector.cache_ttl(), Duration::from_secs(1800));
        assert!(config.auto_deploy.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_defaults_read_environment() {
        std::env::set_var("DISCOVERY_RESYNC_INTERVAL", "45");
        std::env::set_var("CLUSTER_CREDENTIAL_MODE", "workload-identity");
        std::env::set_var("AUTO_DEPLOY_DEFAULT_ENVIRONMENT", "staging");
        std::env::set_var("DEPLOYMENT_DEFAULT_NAMESPACE", "apps");

        let config = ControllerConfig::default();

        std::env::remove_var("DISCOVERY_RESYNC_INTERVAL");
        std::env::remove_var("CLUSTER_CREDENTIAL_MODE");
        std::env::remove_var("AUTO_DEPLOY_DEFAULT_ENVIRONMENT");
        std::env::remove_var("DEPLOYMENT_DEFAULT_NAMESPACE");

        assert_eq!(config.discovery.resync_interval_seconds, 45);
        assert_eq!(config.discovery.environment_timeout_seconds, 60);
        assert_eq!(config.connector.credential_mode, CredentialMode::WorkloadIdentity);
        assert_eq!(config.auto_deploy.default_environment.as_deref(), Some("staging"));
        assert_eq!(config.deployment.default_namespace, "apps");
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_falls_back() {
        std::env::set_var("DISCOVERY_RESYNC_INTERVAL", "five minutes");
        let config = ControllerConfig::default();
        std::env::remove_var("DISCOVERY_RESYNC_INTERVAL");

        assert_eq!(config.discovery.resync_interval_seconds, 300);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = ControllerConfig::default();
        config.discovery.resync_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_backoff_is_capped() {
        let settings = DeploymentSettings {
            resolve_backoff_base_seconds: 5,
            resolve_backoff_max_seconds: 60,
            ..DeploymentSettings::default()
        };
        assert_eq!(settings.resolve_backoff(0), Duration::from_secs(5));
        assert_eq!(settings.resolve_backoff(2), Duration::from_secs(20));
        assert_eq!(settings.resolve_backoff(10), Duration::from_secs(60));
    }

    #[test]
    fn test_error_backoff_doubles() {
        let runtime = RuntimeSettings::default();
        assert_eq!(runtime.error_backoff(1), Duration::from_millis(500));
        assert_eq!(runtime.error_backoff(3), Duration::from_millis(2000));
        assert_eq!(runtime.error_backoff(40), Duration::from_secs(300));
    }

    #[test]
    fn test_credential_mode_parsing() {
        assert_eq!("static".parse::<CredentialMode>().unwrap(), CredentialMode::Static);
        assert_eq!("".parse::<CredentialMode>().unwrap(), CredentialMode::Auto);
        assert!("kerberos".parse::<CredentialMode>().is_err());
    }
}
