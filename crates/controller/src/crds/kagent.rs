//! Runtime resources reconciled by kagent.
//!
//! Only the fields this controller reads or writes are modelled. Everything is
//! `#[serde(default)]` so objects written by newer kagent releases still parse.

use super::condition::Condition;
use kube::core::ApiResource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KAGENT_GROUP: &str = "kagent.dev";

/// Container settings of a locally run MCP server
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDeployment {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransport {
    #[serde(default)]
    pub target_port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct StdioTransport {}

/// `MCPServer` (kmcp) running a tool server from a container image
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kagent.dev", version = "v1alpha1", kind = "MCPServer")]
#[kube(namespaced)]
#[kube(status = "RuntimeStatus")]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    #[serde(default)]
    pub deployment: McpServerDeployment,
    /// `stdio` or `http`
    #[serde(default)]
    pub transport_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_transport: Option<HttpTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdio_transport: Option<StdioTransport>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct HeaderValue {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// `RemoteMCPServer` pointing kagent at an already running endpoint
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kagent.dev", version = "v1alpha2", kind = "RemoteMCPServer")]
#[kube(namespaced)]
#[kube(status = "RuntimeStatus")]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// `STREAMABLE_HTTP` or `SSE`
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_from: Vec<HeaderValue>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ByoDeployment {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ByoAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ByoDeployment>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeAgentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_config: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_message: String,
}

/// OCI references of skills mounted into an agent
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SkillsSpec {
    #[serde(default)]
    pub refs: Vec<String>,
}

/// kagent `Agent`, either declarative (model + prompt) or BYO (own image)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kagent.dev", version = "v1alpha2", kind = "Agent")]
#[kube(namespaced)]
#[kube(status = "RuntimeStatus")]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// `Declarative` or `BYO`
    #[serde(default, rename = "type")]
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declarative: Option<DeclarativeAgentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byo: Option<ByoAgentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<SkillsSpec>,
}

impl AgentSpec {
    pub fn byo_image(&self) -> Option<&str> {
        self.byo
            .as_ref()
            .and_then(|b| b.deployment.as_ref())
            .map(|d| d.image.as_str())
            .filter(|image| !image.is_empty())
    }

    pub fn skill_refs(&self) -> &[String] {
        self.skills.as_ref().map(|s| s.refs.as_slice()).unwrap_or(&[])
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaseUrlConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct OllamaConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct AzureOpenAiConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

/// kagent `ModelConfig` describing one LLM endpoint
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kagent.dev", version = "v1alpha2", kind = "ModelConfig")]
#[kube(namespaced)]
#[kube(status = "RuntimeStatus")]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigSpec {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, rename = "openAI", skip_serializing_if = "Option::is_none")]
    pub open_ai: Option<BaseUrlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<BaseUrlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaConfig>,
    #[serde(default, rename = "azureOpenAI", skip_serializing_if = "Option::is_none")]
    pub azure_open_ai: Option<AzureOpenAiConfig>,
}

impl ModelConfigSpec {
    /// Endpoint of whichever provider block is set
    pub fn base_url(&self) -> Option<&str> {
        [
            self.open_ai.as_ref().map(|c| c.base_url.as_str()),
            self.anthropic.as_ref().map(|c| c.base_url.as_str()),
            self.ollama.as_ref().map(|c| c.host.as_str()),
            self.azure_open_ai.as_ref().map(|c| c.endpoint.as_str()),
        ]
        .into_iter()
        .flatten()
        .find(|url| !url.is_empty())
    }
}

/// Status shape shared by the kagent kinds; only conditions are read
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl RuntimeStatus {
    /// `Ready` condition as (ready, message)
    pub fn readiness(&self) -> (bool, Option<String>) {
        readiness(&self.conditions)
    }
}

pub fn readiness(conditions: &[Condition]) -> (bool, Option<String>) {
    conditions
        .iter()
        .find(|c| c.condition_type == "Ready")
        .map(|c| (c.is_true(), c.message.clone().filter(|m| !m.is_empty())))
        .unwrap_or((false, None))
}

/// Runtime kinds watched or written by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    McpServer,
    RemoteMcpServer,
    Agent,
    ModelConfig,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::McpServer,
        RuntimeKind::RemoteMcpServer,
        RuntimeKind::Agent,
        RuntimeKind::ModelConfig,
    ];

    pub fn api_resource(self) -> ApiResource {
        match self {
            RuntimeKind::McpServer => ApiResource::erase::<MCPServer>(&()),
            RuntimeKind::RemoteMcpServer => ApiResource::erase::<RemoteMCPServer>(&()),
            RuntimeKind::Agent => ApiResource::erase::<Agent>(&()),
            RuntimeKind::ModelConfig => ApiResource::erase::<ModelConfig>(&()),
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            RuntimeKind::McpServer => "MCPServer",
            RuntimeKind::RemoteMcpServer => "RemoteMCPServer",
            RuntimeKind::Agent => "Agent",
            RuntimeKind::ModelConfig => "ModelConfig",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }
}
