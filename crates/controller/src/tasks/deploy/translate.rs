//! Catalog entry + request config -> kagent runtime resources.
//!
//! Everything in here is pure: no store access, no clocks.

use crate::crds::kagent::{
    Agent, AgentSpec, ByoAgentSpec, ByoDeployment, EnvVar, HeaderValue, HttpTransport, MCPServer,
    McpServerDeployment, McpServerSpec, RemoteMCPServer, RemoteMcpServerSpec, RuntimeKind,
    StdioTransport,
};
use crate::crds::{
    AgentPayload, Argument, CatalogEntry, CatalogPayload, Package, RegistryDeployment, ToolServerPayload,
    Transport,
};
use crate::store::to_dynamic;
use crate::tasks::naming::ResourceNaming;
use crate::tasks::types::{
    Error, Result, LABEL_DEPLOYMENT_NAME, LABEL_DEPLOYMENT_NAMESPACE, LABEL_MANAGED_BY,
    LABEL_RESOURCE_NAME, LABEL_RESOURCE_VERSION, MANAGED_BY_VALUE,
};
use kube::core::DynamicObject;
use kube::ResourceExt;
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_HTTP_PORT: u32 = 8080;
pub const KAGENT_URL: &str = "http://localhost";

const PUBLISHER_PROVIDED: &str = "io.modelcontextprotocol.registry/publisher-provided";
const REGISTRY_METADATA: &str = "aregistry.ai/metadata";

/// One runtime object ready to apply
#[derive(Clone, Debug)]
pub struct RuntimeObject {
    pub kind: RuntimeKind,
    pub object: DynamicObject,
}

impl RuntimeObject {
    fn new<K>(kind: RuntimeKind, resource: &K) -> Result<Self>
    where
        K: kube::Resource<DynamicType = ()> + serde::Serialize,
    {
        Ok(Self {
            kind,
            object: to_dynamic(resource)?,
        })
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }
}

/// Translate an entry into the runtime objects realizing `request` in `namespace`
pub fn translate(entry: &CatalogEntry, request: &RegistryDeployment, namespace: &str) -> Result<Vec<RuntimeObject>> {
    let config = &request.spec.config;
    let mut objects = match &entry.spec {
        CatalogPayload::ToolServer(server) => {
            vec![tool_server(server, config, request.spec.prefer_remote, namespace)?]
        }
        CatalogPayload::Agent(agent) => vec![byo_agent(agent, config, namespace)?],
        other => {
            return Err(Error::Translation(format!(
                "{} entries cannot be deployed",
                other.kind()
            )))
        }
    };
    for runtime in &mut objects {
        let labels = runtime.object.labels_mut();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(LABEL_DEPLOYMENT_NAME.to_string(), request.name_any());
        labels.insert(
            LABEL_DEPLOYMENT_NAMESPACE.to_string(),
            request.namespace().unwrap_or_default(),
        );
        labels.insert(
            LABEL_RESOURCE_NAME.to_string(),
            ResourceNaming::label_value(entry.spec.name()),
        );
        labels.insert(
            LABEL_RESOURCE_VERSION.to_string(),
            ResourceNaming::label_value(entry.spec.version().unwrap_or_default()),
        );
    }
    Ok(objects)
}

fn tool_server(
    server: &ToolServerPayload,
    config: &BTreeMap<String, String>,
    prefer_remote: bool,
    namespace: &str,
) -> Result<RuntimeObject> {
    let name = ResourceNaming::runtime_name(&server.name);
    let use_remote = !server.remotes.is_empty() && (prefer_remote || server.packages.is_empty());

    if use_remote {
        let remote = &server.remotes[0];
        let mut resource = RemoteMCPServer::new(
            &name,
            RemoteMcpServerSpec {
                description: server.description.clone(),
                protocol: remote_protocol(remote).to_string(),
                url: with_scheme(&remote.url),
                headers_from: remote
                    .headers
                    .iter()
                    .map(|h| HeaderValue {
                        name: h.name.clone(),
                        value: config.get(&h.name).cloned().unwrap_or_else(|| h.value.clone()),
                    })
                    .collect(),
            },
        );
        resource.metadata.namespace = Some(namespace.to_string());
        return RuntimeObject::new(RuntimeKind::RemoteMcpServer, &resource);
    }

    let Some(package) = server.packages.first() else {
        return Err(Error::Translation(format!(
            "no packages or remotes available for server {}",
            server.name
        )));
    };
    let mut resource = MCPServer::new(&name, local_server_spec(package, config)?);
    resource.metadata.namespace = Some(namespace.to_string());
    RuntimeObject::new(RuntimeKind::McpServer, &resource)
}

fn local_server_spec(package: &Package, config: &BTreeMap<String, String>) -> Result<McpServerSpec> {
    // Package variables first, config overriding; unmatched config keys are appended
    let mut env = BTreeMap::new();
    for var in &package.environment_variables {
        match config.get(&var.name) {
            Some(value) => {
                env.insert(var.name.clone(), value.clone());
            }
            None if !var.value.is_empty() => {
                env.insert(var.name.clone(), var.value.clone());
            }
            None => {}
        }
    }
    for (key, value) in config {
        env.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let (image, cmd, args) = if package.registry_type == "oci" {
        (package.identifier.clone(), None, Vec::new())
    } else {
        let Some((image, cmd)) = image_and_command(&package.registry_type, &package.runtime_hint) else {
            return Err(Error::Translation(format!(
                "unsupported package registry type {:?}",
                package.registry_type
            )));
        };
        let mut args = resolve_arguments(&package.runtime_arguments, config);
        args.push(package.identifier.clone());
        args.extend(resolve_arguments(&package.package_arguments, config));
        (image.to_string(), Some(cmd.to_string()), args)
    };
    if image.is_empty() {
        return Err(Error::Translation("package has no image identifier".to_string()));
    }

    let http = matches!(package.transport.transport_type.as_str(), "http" | "streamable-http");
    let http_transport = http.then(|| {
        let (port, path) = if package.transport.url.is_empty() {
            (DEFAULT_HTTP_PORT, "/".to_string())
        } else {
            let (_, port, path) = parse_url_components(&package.transport.url);
            (port, path)
        };
        HttpTransport {
            target_port: port,
            path: Some(path),
        }
    });

    Ok(McpServerSpec {
        deployment: McpServerDeployment {
            image,
            port: http_transport.as_ref().map(|t| t.target_port),
            cmd,
            args,
            env,
        },
        transport_type: if http { "http" } else { "stdio" }.to_string(),
        stdio_transport: (!http).then(StdioTransport::default),
        http_transport,
    })
}

fn resolve_arguments(arguments: &[Argument], config: &BTreeMap<String, String>) -> Vec<String> {
    arguments
        .iter()
        .filter_map(|arg| match config.get(&arg.name) {
            Some(value) => Some(value.clone()),
            None if !arg.value.is_empty() => Some(arg.value.clone()),
            None => None,
        })
        .collect()
}

fn byo_agent(agent: &AgentPayload, config: &BTreeMap<String, String>, namespace: &str) -> Result<RuntimeObject> {
    if agent.image.is_empty() {
        return Err(Error::Translation(format!("agent {} has no image", agent.name)));
    }

    let mut env = config.clone();
    env.insert("KAGENT_URL".to_string(), KAGENT_URL.to_string());
    env.insert("KAGENT_NAME".to_string(), agent.name.clone());
    env.insert("KAGENT_NAMESPACE".to_string(), namespace.to_string());
    env.insert("AGENT_NAME".to_string(), agent.name.clone());
    if !agent.model_provider.is_empty() {
        env.insert("MODEL_PROVIDER".to_string(), agent.model_provider.clone());
    }
    if !agent.model_name.is_empty() {
        env.insert("MODEL_NAME".to_string(), agent.model_name.clone());
    }

    let mut resource = Agent::new(
        &ResourceNaming::runtime_name(&agent.name),
        AgentSpec {
            agent_type: "BYO".to_string(),
            description: agent.description.clone(),
            byo: Some(ByoAgentSpec {
                deployment: Some(ByoDeployment {
                    image: agent.image.clone(),
                    env: env
                        .into_iter()
                        .map(|(name, value)| EnvVar { name, value })
                        .collect(),
                    ..ByoDeployment::default()
                }),
            }),
            ..AgentSpec::default()
        },
    );
    resource.metadata.namespace = Some(namespace.to_string());
    RuntimeObject::new(RuntimeKind::Agent, &resource)
}

fn remote_protocol(remote: &Transport) -> &'static str {
    if remote.transport_type.eq_ignore_ascii_case("sse") {
        "SSE"
    } else {
        "STREAMABLE_HTTP"
    }
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

/// Base image and launcher for a package registry
pub fn image_and_command(registry_type: &str, runtime_hint: &str) -> Option<(&'static str, &'static str)> {
    match (registry_type, runtime_hint) {
        ("npm", "npx") => Some(("node:20-alpine", "npx")),
        ("npm", _) => Some(("node:20-alpine", "npm")),
        ("pypi", "uvx") => Some(("ghcr.io/astral-sh/uv:latest", "uvx")),
        ("pypi", _) => Some(("python:3.12-slim", "pip")),
        _ => None,
    }
}

/// Host, port and path of a URL; scheme defaults to http, port to the scheme's
pub fn parse_url_components(raw: &str) -> (String, u32, String) {
    if raw.is_empty() {
        return (String::new(), 0, "/".to_string());
    }
    let Ok(url) = Url::parse(&with_scheme(raw)) else {
        return (String::new(), 0, "/".to_string());
    };
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url
        .port()
        .map(u32::from)
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    let path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    (host, port, path)
}

/// Verified organization and publisher, from the governance status or the
/// publisher supplied `_meta` identity block
pub fn validate_publisher_identity(entry: &CatalogEntry) -> std::result::Result<(), String> {
    let (org, publisher) = match &entry.status.publisher {
        Some(p) if p.verified_publisher || p.verified_organization => (p.verified_organization, p.verified_publisher),
        _ => meta_identity(entry.spec.metadata())?,
    };
    match (org, publisher) {
        (true, true) => Ok(()),
        (false, false) => Err("organization is not verified and publisher identity is not verified".to_string()),
        (false, true) => Err("organization is not verified".to_string()),
        (true, false) => Err("publisher identity is not verified".to_string()),
    }
}

fn meta_identity(metadata: Option<&Value>) -> std::result::Result<(bool, bool), String> {
    let identity = metadata
        .and_then(|m| m.get(PUBLISHER_PROVIDED))
        .and_then(|p| p.get(REGISTRY_METADATA))
        .and_then(|m| m.get("identity"))
        .ok_or_else(|| "missing publisher identity metadata".to_string())?;
    let flag = |key: &str| identity.get(key).and_then(Value::as_bool).unwrap_or(false);
    Ok((flag("org_is_verified"), flag("publisher_identity_verified_by_jwt")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{KeyValueInput, PublisherStatus, RegistryDeploymentSpec, ResourceType};
    use crate::store::from_dynamic;
    use serde_json::json;

    fn request(config: &[(&str, &str)]) -> RegistryDeployment {
        let mut request = RegistryDeployment::new(
            "demo-fs-tools-1-0-0-mcp",
            RegistryDeploymentSpec {
                resource_name: "demo-fs-tools".to_string(),
                version: "1.0.0".to_string(),
                resource_type: ResourceType::Mcp,
                runtime: "kubernetes".to_string(),
                config: config
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..RegistryDeploymentSpec::default()
            },
        );
        request.metadata.namespace = Some("agentregistry".to_string());
        request
    }

    fn server(packages: Vec<Package>, remotes: Vec<Transport>) -> CatalogEntry {
        CatalogEntry::new(
            "demo-fs-tools-1-0-0",
            "agentregistry",
            CatalogPayload::ToolServer(ToolServerPayload {
                name: "demo-fs-tools".to_string(),
                version: "1.0.0".to_string(),
                packages,
                remotes,
                ..ToolServerPayload::default()
            }),
        )
    }

    fn npm_package() -> Package {
        Package {
            registry_type: "npm".to_string(),
            identifier: "@demo/fs-tools".to_string(),
            runtime_hint: "npx".to_string(),
            transport: Transport {
                transport_type: "stdio".to_string(),
                ..Transport::default()
            },
            runtime_arguments: vec![Argument {
                name: "yes".to_string(),
                value: "-y".to_string(),
                ..Argument::default()
            }],
            package_arguments: vec![Argument {
                name: "ROOT".to_string(),
                value: "/data".to_string(),
                ..Argument::default()
            }],
            environment_variables: vec![
                KeyValueInput {
                    name: "MAX_FILE_SIZE".to_string(),
                    value: "10".to_string(),
                    ..KeyValueInput::default()
                },
                KeyValueInput {
                    name: "API_KEY".to_string(),
                    ..KeyValueInput::default()
                },
            ],
            ..Package::default()
        }
    }

    fn mcp_server(objects: &[RuntimeObject]) -> MCPServer {
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind, RuntimeKind::McpServer);
        from_dynamic(objects[0].object.clone()).unwrap()
    }

    #[test]
    fn test_npm_package_becomes_stdio_mcp_server() {
        let objects = translate(
            &server(vec![npm_package()], vec![]),
            &request(&[("ROOT", "/srv"), ("LOG_LEVEL", "debug")]),
            "kagent",
        )
        .unwrap();
        let server = mcp_server(&objects);

        assert_eq!(server.name_any(), "demo-fs-tools");
        assert_eq!(server.namespace().as_deref(), Some("kagent"));
        assert_eq!(server.spec.deployment.image, "node:20-alpine");
        assert_eq!(server.spec.deployment.cmd.as_deref(), Some("npx"));
        assert_eq!(server.spec.deployment.args, vec!["-y", "@demo/fs-tools", "/srv"]);
        assert_eq!(server.spec.transport_type, "stdio");
        assert!(server.spec.http_transport.is_none());

        let env = &server.spec.deployment.env;
        assert_eq!(env.get("MAX_FILE_SIZE").map(String::as_str), Some("10"));
        assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert!(!env.contains_key("API_KEY"));

        let labels = server.labels();
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY_VALUE));
        assert_eq!(
            labels.get(LABEL_DEPLOYMENT_NAME).map(String::as_str),
            Some("demo-fs-tools-1-0-0-mcp")
        );
    }

    #[test]
    fn test_oci_http_package_uses_identifier_as_image() {
        let package = Package {
            registry_type: "oci".to_string(),
            identifier: "ghcr.io/demo/fs-tools:1.0.0".to_string(),
            transport: Transport {
                transport_type: "streamable-http".to_string(),
                url: "http://localhost:3000/mcp".to_string(),
                ..Transport::default()
            },
            runtime_arguments: vec![Argument {
                name: "x".to_string(),
                value: "--x".to_string(),
                ..Argument::default()
            }],
            ..Package::default()
        };
        let server = mcp_server(&translate(&server(vec![package], vec![]), &request(&[]), "apps").unwrap());

        assert_eq!(server.spec.deployment.image, "ghcr.io/demo/fs-tools:1.0.0");
        assert!(server.spec.deployment.cmd.is_none());
        assert!(server.spec.deployment.args.is_empty());
        assert_eq!(server.spec.transport_type, "http");
        let http = server.spec.http_transport.unwrap();
        assert_eq!(http.target_port, 3000);
        assert_eq!(http.path.as_deref(), Some("/mcp"));
    }

    #[test]
    fn test_remote_preferred_or_only_option() {
        let remote = Transport {
            transport_type: "sse".to_string(),
            url: "tools.example.com/sse".to_string(),
            headers: vec![KeyValueInput {
                name: "Authorization".to_string(),
                value: "Bearer default".to_string(),
                ..KeyValueInput::default()
            }],
        };

        let objects = translate(
            &server(vec![], vec![remote.clone()]),
            &request(&[("Authorization", "Bearer override")]),
            "kagent",
        )
        .unwrap();
        assert_eq!(objects[0].kind, RuntimeKind::RemoteMcpServer);
        let resource: RemoteMCPServer = from_dynamic(objects[0].object.clone()).unwrap();
        assert_eq!(resource.spec.url, "http://tools.example.com/sse");
        assert_eq!(resource.spec.protocol, "SSE");
        assert_eq!(resource.spec.headers_from[0].value, "Bearer override");

        let both = server(vec![npm_package()], vec![remote]);
        let objects = translate(&both, &request(&[]), "kagent").unwrap();
        assert_eq!(objects[0].kind, RuntimeKind::McpServer);

        let mut prefer = request(&[]);
        prefer.spec.prefer_remote = true;
        let objects = translate(&both, &prefer, "kagent").unwrap();
        assert_eq!(objects[0].kind, RuntimeKind::RemoteMcpServer);
    }

    #[test]
    fn test_untranslatable_entries() {
        let err = translate(&server(vec![], vec![]), &request(&[]), "kagent").unwrap_err();
        assert!(err.is_terminal());

        let mut package = npm_package();
        package.registry_type = "cargo".to_string();
        let err = translate(&server(vec![package], vec![]), &request(&[]), "kagent").unwrap_err();
        assert!(matches!(err, Error::Translation(_)));
    }

    #[test]
    fn test_agent_becomes_byo_agent_with_standard_env() {
        let entry = CatalogEntry::new(
            "helper-1-2-0",
            "agentregistry",
            CatalogPayload::Agent(AgentPayload {
                name: "helper".to_string(),
                version: "1.2.0".to_string(),
                image: "ghcr.io/acme/helper:1.2.0".to_string(),
                model_provider: "anthropic".to_string(),
                ..AgentPayload::default()
            }),
        );
        let mut request = request(&[("TEAM", "platform")]);
        request.spec.resource_type = ResourceType::Agent;

        let objects = translate(&entry, &request, "agents").unwrap();
        assert_eq!(objects[0].kind, RuntimeKind::Agent);
        let agent: Agent = from_dynamic(objects[0].object.clone()).unwrap();
        assert_eq!(agent.spec.agent_type, "BYO");
        assert_eq!(agent.spec.byo_image(), Some("ghcr.io/acme/helper:1.2.0"));

        let env: BTreeMap<String, String> = agent
            .spec
            .byo
            .unwrap()
            .deployment
            .unwrap()
            .env
            .into_iter()
            .map(|e| (e.name, e.value))
            .collect();
        assert_eq!(env.get("TEAM").map(String::as_str), Some("platform"));
        assert_eq!(env.get("KAGENT_NAMESPACE").map(String::as_str), Some("agents"));
        assert_eq!(env.get("AGENT_NAME").map(String::as_str), Some("helper"));
        assert_eq!(env.get("MODEL_PROVIDER").map(String::as_str), Some("anthropic"));
        assert!(!env.contains_key("MODEL_NAME"));
    }

    #[test]
    fn test_parse_url_components() {
        assert_eq!(
            parse_url_components("https://tools.example.com/mcp"),
            ("tools.example.com".to_string(), 443, "/mcp".to_string())
        );
        assert_eq!(
            parse_url_components("localhost:9000"),
            ("localhost".to_string(), 9000, "/".to_string())
        );
        assert_eq!(parse_url_components(""), (String::new(), 0, "/".to_string()));
    }

    #[test]
    fn test_publisher_identity() {
        let mut entry = server(vec![npm_package()], vec![]);
        assert!(validate_publisher_identity(&entry).is_err());

        if let CatalogPayload::ToolServer(payload) = &mut entry.spec {
            payload.metadata = Some(json!({
                "io.modelcontextprotocol.registry/publisher-provided": {
                    "aregistry.ai/metadata": {
                        "identity": {"org_is_verified": true, "publisher_identity_verified_by_jwt": false}
                    }
                }
            }));
        }
        assert_eq!(
            validate_publisher_identity(&entry).unwrap_err(),
            "publisher identity is not verified"
        );

        entry.status.publisher = Some(PublisherStatus {
            verified_publisher: true,
            verified_organization: true,
            ..PublisherStatus::default()
        });
        assert!(validate_publisher_identity(&entry).is_ok());
    }
}
