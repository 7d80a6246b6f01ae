//! Probe, metrics and registration endpoints.
//!
//! Agents exchange their one-time cluster token and request certificates
//! over `/v1/clusters/register` and `/v1/agents/register`.

use crate::error::ControllerError;
use crate::metrics;
use crate::service::{ClusterService, RegisterAgentRequest, RegisterAgentResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bootstrap_client::BootstrapError;
use fleet_types::Cluster;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Readiness flag and drop counter source shared with the handlers
#[derive(Clone)]
pub struct ProbeState {
    pub ready: Arc<AtomicBool>,
    pub dedup_dropped: Arc<dyn Fn() -> u64 + Send + Sync>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Acquire) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

async fn metrics_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    metrics::observe_dedup_dropped((state.dedup_dropped)());
    match metrics::gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterClusterRequest {
    pub token: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControllerError::InvalidToken | ControllerError::TemplateMismatch(..) => StatusCode::FORBIDDEN,
            ControllerError::UsedToken => StatusCode::CONFLICT,
            ControllerError::InvalidCluster(_) | ControllerError::Credential(_) => StatusCode::BAD_REQUEST,
            ControllerError::Bootstrap(BootstrapError::NotFound(_)) => StatusCode::NOT_FOUND,
            ControllerError::Bootstrap(BootstrapError::TokenRevoked(_)) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Registration failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn register_cluster(
    State(service): State<Arc<ClusterService>>,
    Json(request): Json<RegisterClusterRequest>,
) -> Result<Json<Cluster>, ControllerError> {
    service.register(&request.token).await.map(Json)
}

async fn register_agent(
    State(service): State<Arc<ClusterService>>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<Json<RegisterAgentResponse>, ControllerError> {
    service.register_agent(&request).await.map(Json)
}

pub fn router(state: ProbeState, service: Arc<ClusterService>) -> Router {
    let api = Router::new()
        .route("/v1/clusters/register", post(register_cluster))
        .route("/v1/agents/register", post(register_agent))
        .with_state(service);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(api)
        .layer(TraceLayer::new_for_http())
}

/// Serve probes and the registration API until `stop` fires
pub async fn serve(
    addr: SocketAddr,
    state: ProbeState,
    service: Arc<ClusterService>,
    stop: CancellationToken,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving probes, metrics and registration on {}", addr);
    axum::serve(listener, router(state, service))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_service;
    use fleet_types::{ClusterConditionType, ClusterSpec, ConditionStatus};

    fn state(ready: bool) -> ProbeState {
        ProbeState {
            ready: Arc::new(AtomicBool::new(ready)),
            dedup_dropped: Arc::new(|| 0),
        }
    }

    #[tokio::test]
    async fn test_readyz_reflects_flag() {
        let response = readyz(State(state(false))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = readyz(State(state(true))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() {
        let response = metrics_handler(State(state(true))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn register_request(token: &str) -> Json<RegisterClusterRequest> {
        Json(RegisterClusterRequest {
            token: token.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_cluster_endpoint() {
        let (service, _, _) = create_test_service();
        let created = service
            .create(Cluster::new(
                "edge-1",
                ClusterSpec {
                    project: "p1".to_string(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let token = created.status.as_ref().unwrap().token.clone().unwrap();

        let Json(registered) = register_cluster(State(Arc::clone(&service)), register_request(&token))
            .await
            .unwrap();
        assert_eq!(registered.id(), created.id());
        assert!(registered.is_condition(ClusterConditionType::Register, ConditionStatus::Success));

        let replay = register_cluster(State(Arc::clone(&service)), register_request(&token))
            .await
            .into_response();
        assert_eq!(replay.status(), StatusCode::CONFLICT);

        let unknown = register_cluster(State(service), register_request("nope"))
            .await
            .into_response();
        assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ControllerError::InvalidToken, StatusCode::FORBIDDEN),
            (ControllerError::UsedToken, StatusCode::CONFLICT),
            (
                ControllerError::TemplateMismatch("t".to_string(), "relay".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (ControllerError::InvalidCluster("name".to_string()), StatusCode::BAD_REQUEST),
            (
                ControllerError::Bootstrap(BootstrapError::NotFound("template relay".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (ControllerError::Timeout("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let shown = error.to_string();
            assert_eq!(error.into_response().status(), expected, "{}", shown);
        }
    }
}
