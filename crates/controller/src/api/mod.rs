//! Capabilities handed to external collaborators.
//!
//! The REST surface, the tool server and the ingestion pipeline live outside
//! this crate; they read and write registry records through these types only.
//! Every write lands in the same store the reconcilers watch, so the
//! reconcilers pick the change up like any other edit.

pub mod catalog;
pub mod deployments;
pub mod governance;

pub use catalog::CatalogApi;
pub use deployments::{DeploymentApi, DeploymentView};
pub use governance::{GovernanceApi, PublisherUpdate};

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;
