//! Catalog records for tool servers, agents, skills and models.
//!
//! The cluster stores four catalog kinds (`MCPServerCatalog`, `AgentCatalog`,
//! `SkillCatalog`, `ModelCatalog`). They share one status shape and differ only
//! in their spec payload, so in code they are a single [`CatalogEntry`] whose
//! payload is a [`CatalogPayload`] variant selected by [`CatalogKind`].

use super::condition::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const REGISTRY_GROUP: &str = "agentregistry.dev";
pub const REGISTRY_VERSION: &str = "v1alpha1";

/// Which of the four catalog kinds an entry belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CatalogKind {
    ToolServer,
    Agent,
    Skill,
    Model,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::ToolServer,
        CatalogKind::Agent,
        CatalogKind::Skill,
        CatalogKind::Model,
    ];

    /// Kind name of the stored record
    pub fn crd_kind(self) -> &'static str {
        match self {
            CatalogKind::ToolServer => "MCPServerCatalog",
            CatalogKind::Agent => "AgentCatalog",
            CatalogKind::Skill => "SkillCatalog",
            CatalogKind::Model => "ModelCatalog",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            CatalogKind::ToolServer => "mcpservercatalogs",
            CatalogKind::Agent => "agentcatalogs",
            CatalogKind::Skill => "skillcatalogs",
            CatalogKind::Model => "modelcatalogs",
        }
    }

    pub fn api_resource(self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(REGISTRY_GROUP, REGISTRY_VERSION, self.crd_kind());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }

    pub fn from_crd_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.crd_kind() == kind)
    }

    /// Parse an entry of `DiscoveryConfig.spec.environments[].resourceTypes`.
    ///
    /// Accepts catalog names as well as the runtime kind they are sourced from.
    pub fn parse_resource_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "toolserver" | "mcpserver" | "mcp" => Some(CatalogKind::ToolServer),
            "agent" => Some(CatalogKind::Agent),
            "skill" => Some(CatalogKind::Skill),
            "model" | "modelconfig" => Some(CatalogKind::Model),
            _ => None,
        }
    }

    /// Runtime kind a discovered entry of this kind comes from
    pub fn source_kind(self) -> &'static str {
        match self {
            CatalogKind::ToolServer => "MCPServer",
            CatalogKind::Agent => "Agent",
            CatalogKind::Skill => "Skill",
            CatalogKind::Model => "ModelConfig",
        }
    }

    /// Whether the catalog tracks several versions of the same name
    pub fn is_versioned(self) -> bool {
        !matches!(self, CatalogKind::Model)
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogKind::ToolServer => "ToolServer",
            CatalogKind::Agent => "Agent",
            CatalogKind::Skill => "Skill",
            CatalogKind::Model => "Model",
        };
        f.write_str(name)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subfolder: String,
}

/// Runtime object an entry was synthesized from
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SourceReference {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct KeyValueInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Argument {
    pub name: String,
    /// positional or named
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub argument_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multiple: bool,
}

/// Transport of a package or remote endpoint (`stdio`, `streamable-http`, `sse`)
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Transport {
    #[serde(rename = "type", default)]
    pub transport_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValueInput>,
}

/// Installable package of a tool server
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// npm, pypi, oci, ...
    pub registry_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_base_url: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_sha256: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_hint: String,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_arguments: Vec<Argument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<KeyValueInput>,
}

/// Package reference used by agents and skills
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    pub registry_type: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "websiteUrl", skip_serializing_if = "String::is_empty")]
    pub website_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Transport>,
    /// Publisher supplied metadata (registry `_meta` block)
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// MCP server wiring declared by an agent
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentMcpServer {
    #[serde(rename = "type", default)]
    pub server_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub framework: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Transport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<AgentMcpServer>,
    /// Publisher supplied metadata (registry `_meta` block)
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SkillRemote {
    pub url: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<SkillRemote>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, rename = "baseUrl", skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceReference>,
}

/// Kind-specific spec of a catalog entry
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum CatalogPayload {
    ToolServer(ToolServerPayload),
    Agent(AgentPayload),
    Skill(SkillPayload),
    Model(ModelPayload),
}

impl CatalogPayload {
    /// Decode a stored spec; the kind comes from the record type, not the payload.
    pub fn from_value(kind: CatalogKind, value: Value) -> Result<Self, serde_json::Error> {
        let value = if value.is_null() { json!({}) } else { value };
        Ok(match kind {
            CatalogKind::ToolServer => CatalogPayload::ToolServer(serde_json::from_value(value)?),
            CatalogKind::Agent => CatalogPayload::Agent(serde_json::from_value(value)?),
            CatalogKind::Skill => CatalogPayload::Skill(serde_json::from_value(value)?),
            CatalogKind::Model => CatalogPayload::Model(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> CatalogKind {
        match self {
            CatalogPayload::ToolServer(_) => CatalogKind::ToolServer,
            CatalogPayload::Agent(_) => CatalogKind::Agent,
            CatalogPayload::Skill(_) => CatalogKind::Skill,
            CatalogPayload::Model(_) => CatalogKind::Model,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CatalogPayload::ToolServer(p) => &p.name,
            CatalogPayload::Agent(p) => &p.name,
            CatalogPayload::Skill(p) => &p.name,
            CatalogPayload::Model(p) => &p.name,
        }
    }

    /// Models are not versioned and report `None`
    pub fn version(&self) -> Option<&str> {
        match self {
            CatalogPayload::ToolServer(p) => Some(&p.version),
            CatalogPayload::Agent(p) => Some(&p.version),
            CatalogPayload::Skill(p) => Some(&p.version),
            CatalogPayload::Model(_) => None,
        }
    }

    /// Registry `_meta` block, for the kinds that carry one
    pub fn metadata(&self) -> Option<&Value> {
        match self {
            CatalogPayload::ToolServer(p) => p.metadata.as_ref(),
            CatalogPayload::Agent(p) => p.metadata.as_ref(),
            CatalogPayload::Skill(_) | CatalogPayload::Model(_) => None,
        }
    }

    /// At least one package, image or remote endpoint to instantiate
    pub fn is_deployable(&self) -> bool {
        match self {
            CatalogPayload::ToolServer(p) => !p.packages.is_empty() || !p.remotes.is_empty(),
            CatalogPayload::Agent(p) => {
                !p.image.is_empty() || !p.packages.is_empty() || !p.remotes.is_empty()
            }
            CatalogPayload::Skill(_) | CatalogPayload::Model(_) => false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Active,
    Deprecated,
    Deleted,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManagementType {
    /// Mirrored from a cluster, status follows the source
    External,
    /// Deployed through a `RegistryDeployment`
    Managed,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceSource {
    Discovery,
    Manual,
    Deployment,
    Import,
}

impl ProvenanceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvenanceSource::Discovery => "discovery",
            ProvenanceSource::Manual => "manual",
            ProvenanceSource::Deployment => "deployment",
            ProvenanceSource::Import => "import",
        }
    }
}

/// Where an entry came from
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: ProvenanceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Last discovery cycle that observed the source (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_time: Option<String>,
}

impl Provenance {
    pub fn manual() -> Self {
        Self {
            source: ProvenanceSource::Manual,
            environment: None,
            cluster: None,
            namespace: None,
            kind: None,
            name: None,
            last_seen_time: None,
        }
    }

    /// Same source object, ignoring the timestamp
    pub fn same_origin(&self, other: &Provenance) -> bool {
        self.source == other.source
            && self.environment == other.environment
            && self.cluster == other.cluster
            && self.namespace == other.namespace
            && self.kind == other.kind
            && self.name == other.name
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Grade::A,
            80..=89 => Grade::B,
            70..=79 => Grade::C,
            60..=69 => Grade::D,
            _ => Grade::F,
        }
    }
}

/// Governance block, written only through the narrow publisher capability
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublisherStatus {
    #[serde(default)]
    pub verified_publisher: bool,
    #[serde(default)]
    pub verified_organization: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<Grade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_at: Option<String>,
}

/// Observed deployment of the entry
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
}

impl DeploymentSummary {
    /// Equality on everything except `lastChecked`
    pub fn same_observation(&self, other: &DeploymentSummary) -> bool {
        self.ready == other.ready
            && self.namespace == other.namespace
            && self.service_name == other.service_name
            && self.url == other.url
            && self.message == other.message
    }
}

/// Workload referencing a skill or model
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UsageRef {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Status block shared by all four catalog kinds
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LifecycleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_type: Option<ManagementType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<UsageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl CatalogStatus {
    /// Initial status of an entry recorded from an observed source
    pub fn discovered(provenance: Provenance, now: &str) -> Self {
        let mut status = Self {
            management_type: Some(ManagementType::External),
            provenance: Some(provenance),
            ..Self::default()
        };
        status.publish(now);
        status
    }

    /// Mark published/active if not already, stamping `publishedAt` once
    pub fn publish(&mut self, now: &str) {
        if !self.published {
            self.published = true;
            self.published_at = Some(now.to_string());
            self.status = Some(LifecycleStatus::Active);
        }
    }

    /// Fill in the creation-time fields of an entry whose initial status
    /// write never landed. Entries that already carry provenance are left
    /// alone; returns whether anything changed.
    pub fn complete_from(&mut self, initial: &CatalogStatus) -> bool {
        if self.provenance.is_some() || initial.provenance.is_none() {
            return false;
        }
        self.provenance = initial.provenance.clone();
        self.management_type = self.management_type.or(initial.management_type);
        if initial.published && !self.published {
            self.published = true;
            self.published_at = initial.published_at.clone();
            self.status = initial.status;
        }
        if self.deployment.is_none() {
            self.deployment = initial.deployment.clone();
        }
        for usage in &initial.used_by {
            if !self.used_by.contains(usage) {
                self.used_by.push(usage.clone());
            }
        }
        true
    }
}

/// One catalog record of any kind
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub metadata: ObjectMeta,
    pub spec: CatalogPayload,
    pub status: CatalogStatus,
}

impl CatalogEntry {
    pub fn new(name: &str, namespace: &str, spec: CatalogPayload) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec,
            status: CatalogStatus::default(),
        }
    }

    pub fn kind(&self) -> CatalogKind {
        self.spec.kind()
    }

    pub fn name_any(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<String> {
        self.metadata.namespace.clone()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.metadata.labels.get_or_insert_with(BTreeMap::new)
    }

    pub fn from_dynamic(kind: CatalogKind, obj: DynamicObject) -> Result<Self, serde_json::Error> {
        let DynamicObject { metadata, data, .. } = obj;
        let spec = CatalogPayload::from_value(kind, data.get("spec").cloned().unwrap_or(Value::Null))?;
        let status = match data.get("status") {
            Some(Value::Null) | None => CatalogStatus::default(),
            Some(value) => serde_json::from_value(value.clone())?,
        };
        Ok(Self {
            metadata,
            spec,
            status,
        })
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject, serde_json::Error> {
        let ar = self.kind().api_resource();
        let mut obj = DynamicObject::new(&self.name_any(), &ar);
        obj.metadata = self.metadata.clone();
        obj.data = json!({
            "spec": serde_json::to_value(&self.spec)?,
            "status": serde_json::to_value(&self.status)?,
        });
        Ok(obj)
    }
}
