//! Catalog payloads synthesized from runtime resources.
//!
//! Shared by forward discovery (remote clusters) and reverse discovery (the
//! local cluster) so both produce the same spec for the same source object.

pub mod versions;

use crate::crds::kagent::{Agent, MCPServer, ModelConfig};
use crate::crds::{
    AgentPayload, KeyValueInput, ModelPayload, Package, PackageRef, SkillPayload, SourceReference,
    ToolServerPayload, Transport,
};
use kube::ResourceExt;

pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
pub const KMCP_VERSION_LABEL: &str = "kmcp.dev/version";
pub const KMCP_PROJECT_ANNOTATION: &str = "kmcp.dev/project-name";
pub const KMCP_DESCRIPTION_ANNOTATION: &str = "kmcp.dev/description";
pub const KAGENT_DESCRIPTION_ANNOTATION: &str = "kagent.dev/description";
pub const DEFAULT_VERSION: &str = "latest";

/// `app.kubernetes.io/version`, then `kmcp.dev/version`, then `latest`
pub fn version_of<K: ResourceExt>(resource: &K) -> String {
    let labels = resource.labels();
    labels
        .get(VERSION_LABEL)
        .or_else(|| labels.get(KMCP_VERSION_LABEL))
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_VERSION.to_string())
}

fn source_ref<K: ResourceExt>(kind: &str, resource: &K) -> SourceReference {
    SourceReference {
        kind: kind.to_string(),
        name: resource.name_any(),
        namespace: resource.namespace().unwrap_or_default(),
    }
}

pub fn tool_server_payload(server: &MCPServer, spec_name: String) -> ToolServerPayload {
    let annotations = server.annotations();
    let transport_type = if server.spec.transport_type == "http" {
        "streamable-http"
    } else {
        "stdio"
    };
    let environment_variables = server
        .spec
        .deployment
        .env
        .iter()
        .map(|(name, value)| KeyValueInput {
            name: name.clone(),
            value: value.clone(),
            ..KeyValueInput::default()
        })
        .collect();

    ToolServerPayload {
        name: spec_name,
        version: version_of(server),
        title: annotations
            .get(KMCP_PROJECT_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| server.name_any()),
        description: annotations
            .get(KMCP_DESCRIPTION_ANNOTATION)
            .cloned()
            .unwrap_or_default(),
        source_ref: Some(source_ref("MCPServer", server)),
        packages: vec![Package {
            registry_type: "oci".to_string(),
            identifier: server.spec.deployment.image.clone(),
            transport: Transport {
                transport_type: transport_type.to_string(),
                ..Transport::default()
            },
            environment_variables,
            ..Package::default()
        }],
        ..ToolServerPayload::default()
    }
}

pub fn agent_payload(agent: &Agent, spec_name: String) -> AgentPayload {
    let description = if agent.spec.description.is_empty() {
        agent
            .annotations()
            .get(KAGENT_DESCRIPTION_ANNOTATION)
            .cloned()
            .unwrap_or_default()
    } else {
        agent.spec.description.clone()
    };

    AgentPayload {
        name: spec_name,
        version: version_of(agent),
        title: agent.name_any(),
        description,
        image: agent.spec.byo_image().unwrap_or_default().to_string(),
        framework: agent.spec.agent_type.clone(),
        model_name: agent
            .spec
            .declarative
            .as_ref()
            .map(|d| d.model_config.clone())
            .unwrap_or_default(),
        source_ref: Some(source_ref("Agent", agent)),
        ..AgentPayload::default()
    }
}

pub fn model_payload(model: &ModelConfig, spec_name: String) -> ModelPayload {
    ModelPayload {
        name: spec_name,
        provider: model.spec.provider.clone(),
        model: model.spec.model.clone(),
        base_url: model.spec.base_url().unwrap_or_default().to_string(),
        source_ref: Some(source_ref("ModelConfig", model)),
        ..ModelPayload::default()
    }
}

/// An OCI skill reference split into repository and tag/digest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillReference {
    /// The reference as written in the agent spec
    pub reference: String,
    pub repository: String,
    pub version: String,
}

impl SkillReference {
    /// `repo@digest`, `repo:tag` (a colon followed by a `/` is a registry
    /// port), or a bare repository tagged `latest`
    pub fn parse(reference: &str) -> Self {
        let (repository, version) = if let Some((repo, digest)) = reference.rsplit_once('@') {
            (repo, digest)
        } else {
            match reference.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => (repo, tag),
                _ => (reference, DEFAULT_VERSION),
            }
        };
        Self {
            reference: reference.to_string(),
            repository: repository.to_string(),
            version: version.to_string(),
        }
    }

    /// Last two repository segments plus version
    pub fn catalog_name(&self) -> String {
        let segments: Vec<&str> = self.repository.split('/').collect();
        let short = if segments.len() >= 2 {
            segments[segments.len() - 2..].join("-")
        } else {
            self.repository.clone()
        };
        let combined = format!("{short}-{}", self.version)
            .replace(['/', '_', '.', ':'], "-")
            .to_lowercase();
        let truncated: String = combined.chars().take(63).collect();
        truncated.trim_end_matches('-').to_string()
    }

    pub fn title(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(self.repository.as_str())
    }

    pub fn payload(&self) -> SkillPayload {
        SkillPayload {
            name: self.repository.clone(),
            version: self.version.clone(),
            title: self.title().to_string(),
            packages: vec![PackageRef {
                registry_type: "oci".to_string(),
                identifier: self.reference.clone(),
                version: self.version.clone(),
            }],
            ..SkillPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::kagent::{
        AgentSpec, ByoAgentSpec, ByoDeployment, DeclarativeAgentSpec, McpServerDeployment,
        McpServerSpec, ModelConfigSpec, OllamaConfig,
    };
    use std::collections::BTreeMap;

    fn mcp_server(labels: &[(&str, &str)], transport: &str) -> MCPServer {
        let mut server = MCPServer::new(
            "fs-tools",
            McpServerSpec {
                deployment: McpServerDeployment {
                    image: "ghcr.io/acme/fs-tools:1.0.0".to_string(),
                    env: BTreeMap::from([("ROOT".to_string(), "/data".to_string())]),
                    ..McpServerDeployment::default()
                },
                transport_type: transport.to_string(),
                ..McpServerSpec::default()
            },
        );
        server.metadata.namespace = Some("prod".to_string());
        server.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        server
    }

    #[test]
    fn test_tool_server_payload_from_mcp_server() {
        let mut server = mcp_server(&[(KMCP_VERSION_LABEL, "1.0.0")], "http");
        server.metadata.annotations = Some(BTreeMap::from([(
            KMCP_DESCRIPTION_ANNOTATION.to_string(),
            "Filesystem tools".to_string(),
        )]));

        let payload = tool_server_payload(&server, "prod/fs-tools".to_string());
        assert_eq!(payload.name, "prod/fs-tools");
        assert_eq!(payload.version, "1.0.0");
        assert_eq!(payload.title, "fs-tools");
        assert_eq!(payload.description, "Filesystem tools");
        assert_eq!(payload.packages[0].registry_type, "oci");
        assert_eq!(payload.packages[0].identifier, "ghcr.io/acme/fs-tools:1.0.0");
        assert_eq!(payload.packages[0].transport.transport_type, "streamable-http");
        assert_eq!(payload.packages[0].environment_variables[0].name, "ROOT");
        assert_eq!(payload.source_ref.unwrap().namespace, "prod");
    }

    #[test]
    fn test_version_label_precedence() {
        let server = mcp_server(&[(KMCP_VERSION_LABEL, "1.0.0"), (VERSION_LABEL, "2.0.0")], "stdio");
        assert_eq!(version_of(&server), "2.0.0");
        assert_eq!(version_of(&mcp_server(&[], "stdio")), "latest");
        assert_eq!(
            tool_server_payload(&mcp_server(&[], "stdio"), "x".into()).packages[0]
                .transport
                .transport_type,
            "stdio"
        );
    }

    #[test]
    fn test_agent_payload() {
        let agent = Agent::new(
            "helper",
            AgentSpec {
                agent_type: "BYO".to_string(),
                byo: Some(ByoAgentSpec {
                    deployment: Some(ByoDeployment {
                        image: "ghcr.io/acme/helper:1.2.0".to_string(),
                        ..ByoDeployment::default()
                    }),
                }),
                declarative: Some(DeclarativeAgentSpec {
                    model_config: "default-model".to_string(),
                    ..DeclarativeAgentSpec::default()
                }),
                ..AgentSpec::default()
            },
        );
        let payload = agent_payload(&agent, "prod/helper".to_string());
        assert_eq!(payload.image, "ghcr.io/acme/helper:1.2.0");
        assert_eq!(payload.framework, "BYO");
        assert_eq!(payload.model_name, "default-model");
        assert_eq!(payload.version, "latest");
    }

    #[test]
    fn test_model_payload_base_url() {
        let model = ModelConfig::new(
            "llama",
            ModelConfigSpec {
                provider: "Ollama".to_string(),
                model: "llama3".to_string(),
                ollama: Some(OllamaConfig {
                    host: "http://ollama:11434".to_string(),
                }),
                ..ModelConfigSpec::default()
            },
        );
        let payload = model_payload(&model, "prod/llama".to_string());
        assert_eq!(payload.base_url, "http://ollama:11434");
        assert_eq!(payload.provider, "Ollama");
    }

    #[test]
    fn test_skill_reference_parsing() {
        let tagged = SkillReference::parse("ghcr.io/acme/skills/pdf:1.2.0");
        assert_eq!(tagged.repository, "ghcr.io/acme/skills/pdf");
        assert_eq!(tagged.version, "1.2.0");
        assert_eq!(tagged.catalog_name(), "skills-pdf-1-2-0");
        assert_eq!(tagged.title(), "pdf");

        let digest = SkillReference::parse("ghcr.io/acme/pdf@sha256:abc");
        assert_eq!(digest.repository, "ghcr.io/acme/pdf");
        assert_eq!(digest.version, "sha256:abc");

        let port = SkillReference::parse("localhost:5000/skills/pdf");
        assert_eq!(port.repository, "localhost:5000/skills/pdf");
        assert_eq!(port.version, "latest");

        let payload = tagged.payload();
        assert_eq!(payload.packages[0].identifier, "ghcr.io/acme/skills/pdf:1.2.0");
    }
}
