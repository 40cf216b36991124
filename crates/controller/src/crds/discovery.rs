//! `DiscoveryConfig` Custom Resource Definition for multi-cluster discovery

use super::catalog::CatalogKind;
use super::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connection descriptor of the cluster backing an environment
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster name (`local` or empty targets the controller's own cluster)
    #[serde(default)]
    pub name: String,

    /// Default namespace for deployments into this environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// API server endpoint; `https://` is assumed when no scheme is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Base64 encoded CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<String>,

    #[serde(default)]
    pub use_workload_identity: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Secret in the controller namespace holding the bearer token (key `token`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_name: Option<String>,
}

/// Container registry used by the environment
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub use_workload_identity: bool,
}

/// One discovery/deployment target
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,

    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Provider tag (gcp, aws, azure, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,

    #[serde(default)]
    pub discovery_enabled: bool,

    /// Deployment requests may target this environment
    #[serde(default)]
    pub deploy_enabled: bool,

    /// Namespaces to scan (empty = all)
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Resource kinds to scan (empty = all)
    #[serde(default)]
    pub resource_types: Vec<String>,

    /// Extra labels stamped onto discovered entries
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Environment {
    /// Kinds allowed by `resourceTypes`; unknown names are ignored
    pub fn allowed_kinds(&self) -> Vec<CatalogKind> {
        if self.resource_types.is_empty() {
            return CatalogKind::ALL.to_vec();
        }
        let mut kinds: Vec<CatalogKind> = self
            .resource_types
            .iter()
            .filter_map(|t| CatalogKind::parse_resource_type(t))
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Namespace deployments land in when none is given
    pub fn deploy_namespace(&self) -> String {
        self.cluster
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or("")
    }
}

/// `DiscoveryConfig` CRD listing the environments to scan
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "agentregistry.dev", version = "v1alpha1", kind = "DiscoveryConfig")]
#[kube(namespaced)]
#[kube(status = "DiscoveryConfigStatus")]
#[kube(printcolumn = r#"{"name":"Environments","type":"integer","jsonPath":".spec.environments.length"}"#)]
#[kube(printcolumn = r#"{"name":"Last Sync","type":"date","jsonPath":".status.lastSyncTime"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct DiscoveryConfigSpec {
    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// Per-kind counts from the last successful scan
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResourceCounts {
    #[serde(default, alias = "mcpServers")]
    pub tool_servers: u32,
    #[serde(default)]
    pub agents: u32,
    #[serde(default)]
    pub skills: u32,
    #[serde(default)]
    pub models: u32,
}

impl DiscoveredResourceCounts {
    pub fn add(&mut self, kind: CatalogKind, n: u32) {
        match kind {
            CatalogKind::ToolServer => self.tool_servers += n,
            CatalogKind::Agent => self.agents += n,
            CatalogKind::Skill => self.skills += n,
            CatalogKind::Model => self.models += n,
        }
    }

    pub fn get(&self, kind: CatalogKind) -> u32 {
        match kind {
            CatalogKind::ToolServer => self.tool_servers,
            CatalogKind::Agent => self.agents,
            CatalogKind::Skill => self.skills,
            CatalogKind::Model => self.models,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub name: String,

    #[serde(default)]
    pub connected: bool,

    /// Last successful scan (RFC3339); kept across failed cycles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    #[serde(default)]
    pub discovered_resources: DiscoveredResourceCounts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfigStatus {
    #[serde(default)]
    pub environments: Vec<EnvironmentStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DiscoveryConfigStatus {
    pub fn environment(&self, name: &str) -> Option<&EnvironmentStatus> {
        self.environments.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_config_deserialization() {
        let yaml = r#"
apiVersion: agentregistry.dev/v1alpha1
kind: DiscoveryConfig
metadata:
  name: fleet
  namespace: agentregistry
spec:
  environments:
    - name: prod
      provider: gcp
      cluster:
        name: prod-cluster
        projectId: acme-prod
        region: us-central1
        useWorkloadIdentity: true
      discoveryEnabled: true
      namespaces: ["prod"]
      resourceTypes: ["ToolServer"]
      labels:
        team: platform
status:
  environments:
    - name: prod
      connected: true
      discoveredResources:
        mcpServers: 3
"#;
        let config: DiscoveryConfig = serde_yaml::from_str(yaml).unwrap();
        let env = &config.spec.environments[0];

        assert!(env.discovery_enabled);
        assert!(!env.deploy_enabled);
        assert!(env.cluster.use_workload_identity);
        assert_eq!(env.allowed_kinds(), vec![CatalogKind::ToolServer]);
        assert_eq!(env.labels.get("team").map(String::as_str), Some("platform"));

        let status = config.status.unwrap();
        let prod = status.environment("prod").unwrap();
        assert_eq!(prod.discovered_resources.tool_servers, 3);
    }

    #[test]
    fn test_empty_resource_types_allows_all_kinds() {
        let env = Environment {
            name: "dev".to_string(),
            resource_types: vec![],
            ..Environment::default()
        };
        assert_eq!(env.allowed_kinds().len(), 4);

        let env = Environment {
            resource_types: vec!["MCPServer".into(), "ToolServer".into(), "Bogus".into()],
            ..env
        };
        assert_eq!(env.allowed_kinds(), vec![CatalogKind::ToolServer]);
    }

    #[test]
    fn test_deploy_namespace_falls_back_to_environment_name() {
        let mut env = Environment {
            name: "staging".to_string(),
            ..Environment::default()
        };
        assert_eq!(env.deploy_namespace(), "staging");

        env.cluster.namespace = Some("apps".to_string());
        assert_eq!(env.deploy_namespace(), "apps");
    }
}
