//! Integration tests for the governor's HTTP endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use governor_lib::{
    health::{components, HealthRegistry},
    observability::GovernorMetrics,
};
use rl_governor::api::create_router;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

async fn registry() -> HealthRegistry {
    let health = HealthRegistry::new(Duration::from_secs(5));
    health.register_all().await;
    health
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, body.to_vec())
}

async fn get_json(health: &HealthRegistry, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(create_router(health.clone()), uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_lists_every_component() {
    let health = registry().await;

    let (status, body) = get_json(&health, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ticks"], 0);
    for name in components::ALL {
        assert_eq!(body["components"][*name]["status"], "healthy");
    }
}

#[tokio::test]
async fn test_healthz_degraded_still_serves() {
    let health = registry().await;
    health
        .set_degraded(components::ACTUATOR, "Frequency write rejected")
        .await;

    let (status, body) = get_json(&health, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(
        body["components"]["actuator"]["message"],
        "Frequency write rejected"
    );
}

#[tokio::test]
async fn test_healthz_unhealthy_is_503() {
    let health = registry().await;
    health
        .set_unhealthy(components::SAMPLER, "Counter files missing")
        .await;

    let (status, body) = get_json(&health, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_loop_lifecycle() {
    let health = registry().await;

    let (status, body) = get_json(&health, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(body["reason"], "Governor not yet initialized");

    health.set_ready(true).await;
    health.record_tick();
    let (status, body) = get_json(&health, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    health
        .set_unhealthy(components::LEARNER, "Unknown frequency")
        .await;
    let (status, body) = get_json(&health, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "Critical component unhealthy");
}

#[tokio::test]
async fn test_readyz_reports_stalled_loop() {
    let health = HealthRegistry::new(Duration::from_millis(10));
    health.register_all().await;
    health.set_ready(true).await;
    health.record_tick();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get_json(&health, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "Control loop stalled");
}

#[tokio::test]
async fn test_metrics_exposes_governor_series() {
    let metrics = GovernorMetrics::new();
    metrics.observe_tick_latency(0.004);
    metrics.observe_tick_latency(0.06);
    metrics.set_frequency(1_200_000);
    metrics.set_last_reward(-24.3);
    metrics.inc_deadline_misses();

    let (status, content_type, body) = get(create_router(registry().await), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));

    let text = String::from_utf8(body).unwrap();
    for series in [
        "rl_governor_tick_latency_seconds_bucket",
        "rl_governor_tick_latency_seconds_count",
        "rl_governor_frequency_khz",
        "rl_governor_last_reward",
        "rl_governor_deadline_misses_total",
    ] {
        assert!(text.contains(series), "missing {}", series);
    }
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (status, _, _) = get(create_router(registry().await), "/ready").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
