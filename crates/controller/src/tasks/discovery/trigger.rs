use crate::store::ObjectKey;
use crate::tasks::queue::TriggerRequest;
use crate::tasks::types::{Error, Result};
use tokio::sync::mpsc;
use tracing::info;

const TRIGGER_BUFFER: usize = 16;

/// Handle for out-of-cycle discovery scans.
///
/// A rescan only enqueues work; cycles already running are not interrupted.
#[derive(Clone, Debug)]
pub struct DiscoveryTrigger {
    sender: mpsc::Sender<TriggerRequest>,
    namespace: String,
}

impl DiscoveryTrigger {
    pub fn channel(namespace: impl Into<String>) -> (Self, mpsc::Receiver<TriggerRequest>) {
        let (sender, receiver) = mpsc::channel(TRIGGER_BUFFER);
        (
            Self {
                sender,
                namespace: namespace.into(),
            },
            receiver,
        )
    }

    /// Rescan one DiscoveryConfig, or all of them when `config` is `None`
    pub async fn rescan(&self, config: Option<&str>) -> Result<()> {
        let request = config.map(|name| ObjectKey::namespaced(&self.namespace, name));
        info!(config = config.unwrap_or("*"), "🔍 Discovery rescan requested");
        self.sender
            .send(request)
            .await
            .map_err(|_| Error::ConfigError("discovery controller is not running".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rescan_scopes_to_controller_namespace() {
        let (trigger, mut receiver) = DiscoveryTrigger::channel("agentregistry");

        trigger.rescan(Some("fleet")).await.unwrap();
        trigger.rescan(None).await.unwrap();

        assert_eq!(
            receiver.recv().await,
            Some(Some(ObjectKey::namespaced("agentregistry", "fleet")))
        );
        assert_eq!(receiver.recv().await, Some(None));
    }

    #[tokio::test]
    async fn test_rescan_without_controller_fails() {
        let (trigger, receiver) = DiscoveryTrigger::channel("agentregistry");
        drop(receiver);
        assert!(trigger.rescan(None).await.is_err());
    }
}
