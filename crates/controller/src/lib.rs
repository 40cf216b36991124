/*
 * 5D Labs Agent Registry - Control Plane for AI Infrastructure
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Agent registry control plane
//!
//! Inventory and deployment of tool servers, agents, skills and models:
//! discovery across environments, catalog bookkeeping, auto-deployment and
//! deployment of catalog entries onto kagent runtimes.

pub mod api;
pub mod connector;
pub mod crds;
pub mod store;
pub mod tasks;

// Re-export commonly used types
pub use crds::{
    CatalogEntry, CatalogKind, DiscoveryConfig, DiscoveryConfigSpec, RegistryDeployment,
    RegistryDeploymentSpec, RegistryDeploymentStatus,
};
pub use store::{InMemoryStore, KubeStore, ResourceStore};
pub use tasks::config::ControllerConfig;
