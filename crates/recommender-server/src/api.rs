//! HTTP API: recommendations, catalog attributes, health and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use recommender_core::{
    engine::Engine,
    error::RecommendError,
    health::{ComponentStatus, HealthRegistry},
    models::{RecommendationRequest, RecommendationResponse},
    observability::RecommenderMetrics,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health_registry: HealthRegistry,
    pub metrics: RecommenderMetrics,
    /// Expected bearer token; `None` leaves the API open
    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        health_registry: HealthRegistry,
        metrics: RecommenderMetrics,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            engine,
            health_registry,
            metrics,
            auth_token,
        }
    }
}

/// Error body returned by every failing API call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details: None,
            },
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_params", message)
    }

    fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        )
    }
}

impl From<RecommendError> for ApiError {
    fn from(err: RecommendError) -> Self {
        let status = match &err {
            RecommendError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RecommendError::EmptyCatalog { .. } => StatusCode::NOT_FOUND,
            RecommendError::CatalogUnavailable { .. } => StatusCode::BAD_GATEWAY,
            RecommendError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RecommendError::Infeasible { .. } | RecommendError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let details = match &err {
            RecommendError::Infeasible { constraints, .. } => serde_json::to_value(constraints).ok(),
            _ => None,
        };

        let mut api_error = Self::new(status, err.code(), err.to_string());
        api_error.body.details = details;
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Liveness probe; 200 while healthy or degraded, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn status() -> &'static str {
    "ok"
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %err, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// `POST /api/v1/recommender/{provider}/{region}/cluster`
async fn recommend_cluster(
    State(state): State<Arc<AppState>>,
    Path((provider, region)): Path<(String, String)>,
    payload: Result<Json<RecommendationRequest>, JsonRejection>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let Json(mut request) = payload.map_err(|rejection| ApiError::bad_params(rejection.body_text()))?;
    request.provider = provider;
    request.region = region;

    let response = state.engine.recommend(&request).await?;
    Ok(Json(response))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValues {
    pub attribute: String,
    pub values: Vec<u32>,
}

/// `GET /api/v1/recommender/{provider}/{region}/attributes/cpu`
async fn cpu_attributes(
    State(state): State<Arc<AppState>>,
    Path((provider, region)): Path<(String, String)>,
) -> Result<Json<AttributeValues>, ApiError> {
    let values = state.engine.cpu_attribute_values(&provider, &region).await?;
    Ok(Json(AttributeValues {
        attribute: "cpu".to_string(),
        values,
    }))
}

/// Reject API calls without the configured bearer token
async fn require_token(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if provided == Some(expected) {
        next.run(request).await
    } else {
        ApiError::unauthorized().into_response()
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_LENGTH])
        .max_age(Duration::from_secs(12))
}

/// Route prefix for a configured base path; `None` for the root
fn route_prefix(base_path: &str) -> Option<String> {
    let trimmed = base_path.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else if trimmed.starts_with('/') {
        Some(trimmed.to_string())
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>, base_path: &str, cors_allow_all: bool) -> Router {
    let recommender_api = Router::new()
        .route(
            "/api/v1/recommender/:provider/:region/cluster",
            post(recommend_cluster),
        )
        .route(
            "/api/v1/recommender/:provider/:region/cluster/",
            post(recommend_cluster),
        )
        .route(
            "/api/v1/recommender/:provider/:region/attributes/cpu",
            get(cpu_attributes),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let routes = Router::new()
        .route("/status", get(status))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .merge(recommender_api);

    let router = match route_prefix(base_path) {
        Some(prefix) => Router::new().nest(&prefix, routes),
        None => routes,
    };

    let router = if cors_allow_all {
        router.layer(cors_layer())
    } else {
        router
    };

    router.with_state(state)
}

/// Start the API server and run until `shutdown` completes
pub async fn serve<F>(port: u16, router: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_prefix() {
        assert_eq!(route_prefix("/"), None);
        assert_eq!(route_prefix(""), None);
        assert_eq!(route_prefix("/recommender/"), Some("/recommender".to_string()));
        assert_eq!(route_prefix("/a/b"), Some("/a/b".to_string()));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (RecommendError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                RecommendError::EmptyCatalog {
                    provider: "aws".into(),
                    region: "r".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                RecommendError::CatalogUnavailable {
                    provider: "aws".into(),
                    region: "r".into(),
                    reason: "down".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                RecommendError::Timeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                RecommendError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let code = err.code();
            let api_error = ApiError::from(err);
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.body.code, code);
            assert!(api_error.body.details.is_none());
        }
    }
}
