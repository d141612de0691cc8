//! Agent HTTP server: the processor framework plus a health surface,
//! served with graceful shutdown.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::processors::ProcessorRegistry;

/// Identity reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub node_name: String,
    pub version: &'static str,
}

/// Assemble the agent router: `/healthz` plus every registered processor.
pub fn agent_router(identity: AgentIdentity, registry: ProcessorRegistry) -> Router {
    let processors = registry.paths();
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(HealthState {
            identity,
            processors,
        })
        .merge(registry.into_router())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Clone)]
struct HealthState {
    identity: AgentIdentity,
    processors: Vec<String>,
}

async fn healthz(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "node": state.identity.node_name,
        "version": state.identity.version,
        "processors": state.processors,
    }))
}

/// Serve `router` on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "agent server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
