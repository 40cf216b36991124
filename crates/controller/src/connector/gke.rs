//! GKE workload identity: an access token from the metadata server, the
//! cluster endpoint and CA from the container API.

use super::{normalize_endpoint, ClusterCredentials, ConnectorError};
use crate::crds::Environment;
use crate::tasks::config::ConnectorSettings;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterInfo {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    master_auth: MasterAuth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterAuth {
    #[serde(default)]
    cluster_ca_certificate: String,
}

#[derive(Clone, Debug)]
pub struct GkeCredentials {
    http: Client,
    metadata_url: String,
    api_url: String,
}

impl GkeCredentials {
    pub fn new(settings: &ConnectorSettings) -> Result<Self, ConnectorError> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent("agentregistry-controller")
            .build()?;
        Ok(Self {
            http,
            metadata_url: settings.metadata_url.trim_end_matches('/').to_string(),
            api_url: settings.gke_api_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn resolve(&self, environment: &Environment) -> Result<ClusterCredentials, ConnectorError> {
        let cluster = &environment.cluster;
        let project = cluster
            .project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConnectorError::invalid(&environment.name, "projectId is required for GKE"))?;
        let location = cluster
            .zone
            .as_deref()
            .filter(|z| !z.is_empty())
            .or(cluster.region.as_deref().filter(|r| !r.is_empty()))
            .ok_or_else(|| {
                ConnectorError::invalid(&environment.name, "cluster zone or region is required for GKE")
            })?;

        let token = self.access_token(environment).await?;
        let path = format!(
            "projects/{project}/locations/{location}/clusters/{}",
            cluster.name
        );
        debug!(environment = %environment.name, cluster_path = %path, "Fetching GKE cluster info");

        let response = self
            .http
            .get(format!("{}/v1/{path}", self.api_url))
            .bearer_auth(&token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectorError::credentials(
                &environment.name,
                format!("failed to get GKE cluster {path}: HTTP {}", response.status()),
            ));
        }
        let info: ClusterInfo = response.json().await?;
        if info.endpoint.is_empty() {
            return Err(ConnectorError::credentials(
                &environment.name,
                format!("GKE cluster {path} has no endpoint"),
            ));
        }

        Ok(ClusterCredentials {
            endpoint: normalize_endpoint(&info.endpoint),
            ca_data: Some(info.master_auth.cluster_ca_certificate).filter(|ca| !ca.is_empty()),
            token: Some(token),
        })
    }

    async fn access_token(&self, environment: &Environment) -> Result<String, ConnectorError> {
        let response = self
            .http
            .get(format!("{}{TOKEN_PATH}", self.metadata_url))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectorError::credentials(
                &environment.name,
                format!("metadata server returned HTTP {}", response.status()),
            ));
        }
        let token: AccessToken = response.json().await?;
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ClusterConfig;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> ConnectorSettings {
        ConnectorSettings {
            metadata_url: server.uri(),
            gke_api_url: server.uri(),
            ..ConnectorSettings::default()
        }
    }

    fn environment(zone: Option<&str>, region: Option<&str>) -> Environment {
        Environment {
            name: "prod".to_string(),
            provider: Some("gcp".to_string()),
            cluster: ClusterConfig {
                name: "prod-gke".to_string(),
                project_id: Some("acme".to_string()),
                zone: zone.map(str::to_string),
                region: region.map(str::to_string),
                use_workload_identity: true,
                ..ClusterConfig::default()
            },
            ..Environment::default()
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolves_cluster_with_zone() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/acme/locations/us-central1-a/clusters/prod-gke"))
            .and(header("Authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "prod-gke",
                "endpoint": "34.1.2.3",
                "masterAuth": { "clusterCaCertificate": "Y2E=" }
            })))
            .mount(&server)
            .await;

        let gke = GkeCredentials::new(&settings(&server)).unwrap();
        let creds = gke.resolve(&environment(Some("us-central1-a"), None)).await.unwrap();

        assert_eq!(creds.endpoint, "https://34.1.2.3");
        assert_eq!(creds.ca_data.as_deref(), Some("Y2E="));
        assert_eq!(creds.token.as_deref(), Some("ya29.token"));
    }

    #[tokio::test]
    async fn test_falls_back_to_region() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/acme/locations/us-central1/clusters/prod-gke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "endpoint": "34.1.2.4",
                "masterAuth": { "clusterCaCertificate": "Y2E=" }
            })))
            .mount(&server)
            .await;

        let gke = GkeCredentials::new(&settings(&server)).unwrap();
        let creds = gke.resolve(&environment(None, Some("us-central1"))).await.unwrap();
        assert_eq!(creds.endpoint, "https://34.1.2.4");
    }

    #[tokio::test]
    async fn test_location_is_required() {
        let server = MockServer::start().await;
        let gke = GkeCredentials::new(&settings(&server)).unwrap();
        let err = gke.resolve(&environment(None, None)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_cluster_lookup_failure_is_credential_error() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let gke = GkeCredentials::new(&settings(&server)).unwrap();
        let err = gke.resolve(&environment(Some("us-central1-a"), None)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Credentials { .. }));
    }
}
