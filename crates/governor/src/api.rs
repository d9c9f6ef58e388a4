//! Health, readiness and Prometheus endpoints

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use governor_lib::health::{ComponentStatus, HealthRegistry};
use prometheus::{Encoder, TextEncoder, TEXT_FORMAT};
use tracing::{info, warn};

/// Degraded components still serve, so only unhealthy returns 503
async fn healthz(State(health): State<HealthRegistry>) -> Response {
    let report = health.health().await;
    let code = match report.status {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report)).into_response()
}

async fn readyz(State(health): State<HealthRegistry>) -> Response {
    let readiness = health.readiness().await;
    let code = match readiness.ready {
        true => StatusCode::OK,
        false => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(readiness)).into_response()
}

/// Everything in the default registry, governor metrics included
async fn metrics() -> Response {
    let mut body = Vec::new();
    match TextEncoder::new().encode(&prometheus::gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router(health: HealthRegistry) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(health)
}

pub async fn serve(port: u16, health: HealthRegistry) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, create_router(health)).await?;
    Ok(())
}
