//! Static credentials: endpoint and CA bundle from the environment, bearer
//! token from a Secret in the controller namespace.

use super::{normalize_endpoint, ClusterCredentials, ConnectorError};
use crate::crds::Environment;
use crate::store::{get_as, ResourceStore};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

pub const TOKEN_KEY: &str = "token";

pub async fn resolve(
    environment: &Environment,
    local: &dyn ResourceStore,
    namespace: &str,
) -> Result<ClusterCredentials, ConnectorError> {
    let cluster = &environment.cluster;
    let endpoint = cluster
        .endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ConnectorError::invalid(&environment.name, "cluster endpoint is required"))?;

    let ca_data = cluster.ca_data.clone().filter(|ca| !ca.is_empty());
    if let Some(ca) = &ca_data {
        STANDARD
            .decode(ca)
            .map_err(|e| ConnectorError::invalid(&environment.name, format!("failed to decode CA data: {e}")))?;
    }

    let token = match cluster.token_secret_name.as_deref().filter(|s| !s.is_empty()) {
        Some(secret_name) => Some(read_token(environment, local, namespace, secret_name).await?),
        None => None,
    };

    let endpoint = normalize_endpoint(endpoint);
    debug!(environment = %environment.name, endpoint = %endpoint, "Resolved static cluster credentials");
    Ok(ClusterCredentials {
        endpoint,
        ca_data,
        token,
    })
}

async fn read_token(
    environment: &Environment,
    local: &dyn ResourceStore,
    namespace: &str,
    secret_name: &str,
) -> Result<String, ConnectorError> {
    let secret = get_as::<Secret>(local, Some(namespace), secret_name)
        .await?
        .ok_or_else(|| {
            ConnectorError::credentials(
                &environment.name,
                format!("token secret {namespace}/{secret_name} not found"),
            )
        })?;

    let from_data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(TOKEN_KEY))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
    let from_string_data = secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(TOKEN_KEY))
        .cloned();

    from_data
        .or(from_string_data)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ConnectorError::credentials(
                &environment.name,
                format!("secret {namespace}/{secret_name} has no '{TOKEN_KEY}' key"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ClusterConfig;
    use crate::store::{to_dynamic, InMemoryStore};
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use kube::core::ApiResource;
    use std::collections::BTreeMap;

    fn environment(token_secret: Option<&str>, ca: &str) -> Environment {
        Environment {
            name: "prod".to_string(),
            cluster: ClusterConfig {
                name: "prod-cluster".to_string(),
                endpoint: Some("10.0.0.1".to_string()),
                ca_data: Some(ca.to_string()),
                token_secret_name: token_secret.map(str::to_string),
                ..ClusterConfig::default()
            },
            ..Environment::default()
        }
    }

    async fn store_with_secret(name: &str, token: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("agentregistry".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                TOKEN_KEY.to_string(),
                ByteString(token.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        };
        let ar = ApiResource::erase::<Secret>(&());
        store.insert(&ar, to_dynamic(&secret).unwrap()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolves_endpoint_ca_and_token() {
        let store = store_with_secret("prod-token", "abc123\n").await;
        let creds = resolve(&environment(Some("prod-token"), "Y2E="), &store, "agentregistry")
            .await
            .unwrap();

        assert_eq!(creds.endpoint, "https://10.0.0.1");
        assert_eq!(creds.ca_data.as_deref(), Some("Y2E="));
        assert_eq!(creds.token.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_credential_error() {
        let store = InMemoryStore::new();
        let err = resolve(&environment(Some("absent"), "Y2E="), &store, "agentregistry")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Credentials { .. }));
    }

    #[tokio::test]
    async fn test_invalid_ca_data_is_rejected() {
        let store = InMemoryStore::new();
        let err = resolve(&environment(None, "%%not-base64%%"), &store, "agentregistry")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidConfig { .. }));
    }
}
