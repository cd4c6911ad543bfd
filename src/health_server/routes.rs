//! Health and metrics routes

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::failover::FailoverManager;
use crate::observability::MetricsRegistry;
use crate::peer::{HealthProbe, PeerMonitor};
use crate::store::EventStore;

/// Read-only view of the peer monitor for the health endpoint.
pub trait PeerStatus: Send + Sync {
    fn peer_healthy(&self) -> bool;
}

impl<P: HealthProbe> PeerStatus for PeerMonitor<P> {
    fn peer_healthy(&self) -> bool {
        self.is_healthy()
    }
}

/// Shared state behind the routes.
pub struct HealthState {
    pub device_id: String,
    pub session_id: String,
    pub store: Arc<EventStore>,
    pub failover: Arc<FailoverManager>,
    /// `None` when no peer is configured
    pub peer: Option<Arc<dyn PeerStatus>>,
}

impl HealthState {
    fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.store.metrics()
    }
}

/// `GET /health` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub device_id: String,
    pub session_id: String,
    pub primary_stage: String,
    pub failover_active: bool,
    pub active_stages: Vec<String>,
    pub peer_healthy: Option<bool>,
    pub events_logged: usize,
}

pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let failover = state.failover.state();
    let response = HealthResponse {
        status: "ok".to_string(),
        device_id: state.device_id.clone(),
        session_id: state.session_id.clone(),
        primary_stage: failover.primary_stage.clone(),
        failover_active: failover.active,
        active_stages: failover.active_stages(),
        peer_healthy: state.peer.as_ref().map(|p| p.peer_healthy()),
        events_logged: state.store.get_event_count(&state.session_id),
    };
    (StatusCode::OK, Json(response))
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.metrics().snapshot()))
}
