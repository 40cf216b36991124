/*
 * 5D Labs Agent Registry - Controller Service
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

//! Registry Controller Service
//!
//! Runs the registry control plane:
//! - Discovery of tool servers, agents, skills and models across environments
//! - Reverse discovery of runtime resources created outside the registry
//! - Auto-deployment of labelled catalog entries
//! - Deployment of `RegistryDeployment` requests as kagent resources
//! - Health, readiness and discovery rescan endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use registry_controller::connector::EnvironmentConnector;
use registry_controller::store::{KubeStore, ResourceStore};
use registry_controller::tasks::{load_config, run_registry_controllers, watched_resources, DiscoveryTrigger};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_NAMESPACE: &str = "agentregistry";

#[derive(Clone)]
struct AppState {
    trigger: DiscoveryTrigger,
    ready: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
struct RescanParams {
    config: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,registry_controller=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        "Starting 5D Labs Registry Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let namespace = std::env::var("POD_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let config = load_config()?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Syncing local mirrors...");
    let store: Arc<dyn ResourceStore> = Arc::new(
        KubeStore::mirrored(client, watched_resources(), config.runtime.mirror_sync_timeout()).await?,
    );
    info!("✅ Local mirrors synced");

    let connector = Arc::new(EnvironmentConnector::new(
        store.clone(),
        namespace.clone(),
        config.connector.clone(),
    )?);
    let (trigger, trigger_rx) = DiscoveryTrigger::channel(namespace.clone());
    let ready = Arc::new(AtomicBool::new(false));

    let controller_handle = {
        let ready = ready.clone();
        tokio::spawn(async move {
            ready.store(true, Ordering::SeqCst);
            if let Err(e) = run_registry_controllers(store, connector, namespace, config, trigger_rx).await {
                error!("Controller error: {}", e);
                std::process::exit(1);
            }
        })
    };

    let state = AppState { trigger, ready };

    // Build the HTTP router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/discovery/rescan", post(rescan))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("Controller HTTP server listening on 0.0.0.0:8080");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Registry controller stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "registry-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.ready.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "registry-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn rescan(
    State(state): State<AppState>,
    Query(params): Query<RescanParams>,
) -> (StatusCode, Json<Value>) {
    match state.trigger.rescan(params.config.as_deref()).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "config": params.config,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "error": e.to_string(),
            })),
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
