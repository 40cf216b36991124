//! Publisher verification and scoring, written by the governance service.

use super::{ApiError, ApiResult};
use crate::crds::{CatalogKind, Grade, PublisherStatus};
use crate::store::update_entry_status;
use crate::store::ResourceStore;
use std::sync::Arc;
use tracing::info;

/// What the governance service reports for one entry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublisherUpdate {
    pub verified_publisher: bool,
    pub verified_organization: bool,
    /// 0-100; `None` leaves any previous score and grade in place
    pub score: Option<u8>,
}

/// Writes `status.publisher` and nothing else
#[derive(Clone)]
pub struct GovernanceApi {
    store: Arc<dyn ResourceStore>,
    namespace: String,
}

impl GovernanceApi {
    pub fn new(store: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub async fn set_publisher(
        &self,
        kind: CatalogKind,
        entry_name: &str,
        update: PublisherUpdate,
    ) -> ApiResult<PublisherStatus> {
        if let Some(score) = update.score.filter(|s| *s > 100) {
            return Err(ApiError::Invalid(format!("score {score} is outside 0-100")));
        }
        let now = chrono::Utc::now().to_rfc3339();

        let result = update_entry_status(self.store.as_ref(), kind, &self.namespace, entry_name, |entry| {
            let mut publisher = entry.status.publisher.clone().unwrap_or_default();
            publisher.verified_publisher = update.verified_publisher;
            publisher.verified_organization = update.verified_organization;
            if let Some(score) = update.score {
                publisher.score = Some(score);
                publisher.grade = Some(Grade::from_score(score));
                publisher.graded_at = Some(now.clone());
            }
            entry.status.publisher = Some(publisher);
            true
        })
        .await;

        match result {
            Ok(entry) => {
                let publisher = entry.status.publisher.unwrap_or_default();
                info!(
                    kind = %kind,
                    entry = entry_name,
                    verified = publisher.verified_publisher && publisher.verified_organization,
                    grade = ?publisher.grade,
                    "Publisher status updated"
                );
                Ok(publisher)
            }
            Err(e) if e.is_not_found() => Err(ApiError::NotFound(format!("{kind} {entry_name}"))),
            Err(e) => Err(e.into()),
        }
    }
}
