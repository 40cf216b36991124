//! `RegistryDeployment` Custom Resource Definition (deployment requests)

use super::catalog::CatalogKind;
use super::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of catalog entry a request deploys
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Mcp,
    Agent,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Mcp => "mcp",
            ResourceType::Agent => "agent",
        }
    }

    pub fn catalog_kind(self) -> CatalogKind {
        match self {
            ResourceType::Mcp => CatalogKind::ToolServer,
            ResourceType::Agent => CatalogKind::Agent,
        }
    }

    /// Only tool servers and agents can be deployed
    pub fn for_catalog_kind(kind: CatalogKind) -> Option<Self> {
        match kind {
            CatalogKind::ToolServer => Some(ResourceType::Mcp),
            CatalogKind::Agent => Some(ResourceType::Agent),
            CatalogKind::Skill | CatalogKind::Model => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_runtime() -> String {
    "kubernetes".to_string()
}

/// `RegistryDeployment` CRD: intent to run one catalog entry version
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "agentregistry.dev", version = "v1alpha1", kind = "RegistryDeployment")]
#[kube(namespaced)]
#[kube(status = "RegistryDeploymentStatus")]
#[kube(printcolumn = r#"{"name":"Resource","type":"string","jsonPath":".spec.resourceName"}"#)]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#)]
#[kube(printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.resourceType"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDeploymentSpec {
    /// `spec.name` of the catalog entry
    pub resource_name: String,

    pub version: String,

    pub resource_type: ResourceType,

    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Use a remote endpoint instead of running a package when both exist
    #[serde(default)]
    pub prefer_remote: bool,

    /// Merged into the runtime resource's environment/headers/arguments
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Target namespace (defaults to the controller's deployment namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Target environment from a `DiscoveryConfig`; local cluster when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum DeploymentPhase {
    #[default]
    Pending,
    Resolving,
    Translating,
    Applying,
    Observing,
    Running,
    Failed,
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runtime object owned by a deployment request
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDeploymentStatus {
    #[serde(default)]
    pub phase: DeploymentPhase,

    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Namespace the runtime resources were applied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Machine readable failure reason (CatalogNotFound, ValidationError, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub resolve_attempts: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_resources: Vec<ManagedResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl RegistryDeploymentStatus {
    /// Compare ignoring timestamps, so re-observing an unchanged state is not a write
    pub fn same_state(&self, other: &RegistryDeploymentStatus) -> bool {
        let strip = |s: &RegistryDeploymentStatus| {
            let mut s = s.clone();
            s.updated_at = None;
            s.deployed_at = None;
            for c in &mut s.conditions {
                c.last_transition_time = None;
            }
            s
        };
        strip(self) == strip(other)
    }
}
