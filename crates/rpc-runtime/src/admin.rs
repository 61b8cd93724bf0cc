//! Admin HTTP surface: `/health` and `/stats`.

use crate::domain::config::TransportConfig;
use crate::domain::error::{RpcError, RpcResult};
use crate::domain::services::ServiceTable;
use crate::middleware::{MetricsSnapshot, RuntimeMetrics};
use crate::server::{PoolSnapshot, WorkerPool};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across admin handlers
#[derive(Clone)]
pub struct AdminState {
    rpc_addr: SocketAddr,
    transport: TransportConfig,
    services: Arc<ServiceTable>,
    pool: Arc<WorkerPool>,
    metrics: Arc<RuntimeMetrics>,
}

impl AdminState {
    pub fn new(
        rpc_addr: SocketAddr,
        transport: TransportConfig,
        services: Arc<ServiceTable>,
        pool: Arc<WorkerPool>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            rpc_addr,
            transport,
            services,
            pool,
            metrics,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rpc_addr: SocketAddr,
    services: usize,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    transport: String,
    serializer: String,
    services: Vec<String>,
    workers: PoolSnapshot,
    metrics: MetricsSnapshot,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let status = if state.pool.snapshot().closed {
        "draining"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        rpc_addr: state.rpc_addr,
        services: state.services.len(),
    })
}

async fn stats(State(state): State<AdminState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        transport: state.transport.kind.to_string(),
        serializer: state.transport.serializer.to_string(),
        services: state.services.service_names(),
        workers: state.pool.snapshot(),
        metrics: state.metrics.snapshot(),
    })
}

/// Serve the admin router on `addr` until `shutdown` fires.
pub async fn serve_admin(
    addr: SocketAddr,
    state: AdminState,
    shutdown: CancellationToken,
) -> RpcResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting admin server");
    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| RpcError::Transport(format!("admin server failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::WorkerPoolConfig;
    use crate::domain::services::ServiceDef;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use shared_types::{TypeDescriptor, Value};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let services = ServiceTable::new([
            ServiceDef::new("EchoService").handler(
                "echo",
                vec![TypeDescriptor::String],
                TypeDescriptor::String,
                |p| Ok(p[0].clone()),
            ),
            ServiceDef::new("UserService").handler("ping", vec![], TypeDescriptor::Unit, |_| {
                Ok(Value::Unit)
            }),
        ])
        .unwrap();
        AdminState::new(
            "127.0.0.1:7070".parse().unwrap(),
            TransportConfig::default(),
            Arc::new(services),
            Arc::new(WorkerPool::new(&WorkerPoolConfig::default()).unwrap()),
            Arc::new(RuntimeMetrics::new()),
        )
    }

    async fn get_json(path: &str) -> serde_json::Value {
        let response = admin_router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let json = get_json("/health").await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["services"], 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let json = get_json("/stats").await;
        assert_eq!(json["transport"], "binary");
        assert_eq!(json["serializer"], "bincode");
        assert_eq!(
            json["services"],
            serde_json::json!(["EchoService", "UserService"])
        );
        assert_eq!(json["workers"]["threads"], 16);
        assert_eq!(json["metrics"]["requests_total"], 0);
    }
}
