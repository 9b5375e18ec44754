//! Health check HTTP server for process supervision. Serves
//! liveness/readiness probes and a Prometheus metrics endpoint on
//! `ServerConfig.health_port`, separate from the ingest router.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::persistence::{JobBroker, Store, QUEUE_EVENTS, QUEUE_ROUTING};
use crate::services::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

/// Shared state for the health server, separate from `api::state::AppState`
/// since it runs on its own port and has no auth-gated surface.
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    pub store: Store,
    pub broker: JobBroker,
    pub metrics: Arc<Metrics>,
}

impl HealthState {
    pub fn new(store: Store, broker: JobBroker, metrics: Arc<Metrics>) -> Self {
        Self {
            started_at: Utc::now(),
            store,
            broker,
            metrics,
        }
    }

    async fn database_health(&self) -> ComponentHealth {
        match sqlx::query("SELECT 1").execute(self.store.pool()).await {
            Ok(_) => ComponentHealth {
                name: "database".to_string(),
                status: HealthStatus::Healthy,
                message: None,
            },
            Err(e) => ComponentHealth {
                name: "database".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
            },
        }
    }

    async fn queue_health(&self, queue: &str) -> ComponentHealth {
        match self.broker.queue_depth(queue).await {
            Ok(depth) if depth > 10_000 => ComponentHealth {
                name: format!("queue:{queue}"),
                status: HealthStatus::Degraded,
                message: Some(format!("{depth} jobs queued")),
            },
            Ok(depth) => ComponentHealth {
                name: format!("queue:{queue}"),
                status: HealthStatus::Healthy,
                message: Some(format!("{depth} jobs queued")),
            },
            Err(e) => ComponentHealth {
                name: format!("queue:{queue}"),
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
            },
        }
    }

    pub async fn get_health(&self) -> HealthResponse {
        let components = vec![
            self.database_health().await,
            self.queue_health(QUEUE_EVENTS).await,
            self.queue_health(QUEUE_ROUTING).await,
        ];

        let status = if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            components,
        }
    }
}

pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!(%addr, "starting health server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::LeadflowError::Internal(format!("health server error: {e}")))?;

        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Process-alive probe; never touches the database.
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_equality() {
        assert_eq!(HealthStatus::Healthy, HealthStatus::Healthy);
        assert_ne!(HealthStatus::Healthy, HealthStatus::Unhealthy);
    }
}
