use super::RuntimeSource;
use crate::crds::kagent::Agent;
use crate::crds::{CatalogKind, CatalogPayload, Condition};
use crate::tasks::catalog;

impl RuntimeSource for Agent {
    const CATALOG_KIND: CatalogKind = CatalogKind::Agent;
    const CONTROLLER: &'static str = "agent-discovery";

    fn catalog_payload(&self, spec_name: String) -> CatalogPayload {
        CatalogPayload::Agent(catalog::agent_payload(self, spec_name))
    }

    fn runtime_conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::super::ReverseDiscoveryReconciler;
    use super::*;
    use crate::connector::MockClusterConnector;
    use crate::crds::kagent::{AgentSpec, ByoAgentSpec, ByoDeployment};
    use crate::store::{get_entry, to_dynamic, InMemoryStore, ObjectKey};
    use crate::tasks::config::ControllerConfig;
    use crate::tasks::queue::Reconciler;
    use crate::tasks::types::Context;
    use kube::core::ApiResource;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_byo_agent_backfills_agent_entry() {
        let store = Arc::new(InMemoryStore::new());
        let mut agent = Agent::new(
            "helper",
            AgentSpec {
                agent_type: "BYO".to_string(),
                description: "Answers questions".to_string(),
                byo: Some(ByoAgentSpec {
                    deployment: Some(ByoDeployment {
                        image: "ghcr.io/acme/helper:0.3.0".to_string(),
                        ..ByoDeployment::default()
                    }),
                }),
                ..AgentSpec::default()
            },
        );
        agent.metadata.namespace = Some("staging".to_string());
        agent.metadata.labels = Some([("app.kubernetes.io/version".to_string(), "0.3.0".to_string())].into());
        store
            .insert(&ApiResource::erase::<Agent>(&()), to_dynamic(&agent).unwrap())
            .await
            .unwrap();

        let ctx = Context::new(
            store.clone(),
            Arc::new(MockClusterConnector::new()),
            "agentregistry",
            ControllerConfig::default(),
        );
        ReverseDiscoveryReconciler::<Agent>::new(ctx)
            .reconcile(&ObjectKey::namespaced("staging", "helper"))
            .await
            .unwrap();

        let entry = get_entry(store.as_ref(), CatalogKind::Agent, "agentregistry", "staging-helper")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.spec.version(), Some("0.3.0"));
        assert!(entry.spec.is_deployable());
        assert_eq!(entry.label("agentregistry.dev/resource-environment"), Some("staging"));
    }
}
