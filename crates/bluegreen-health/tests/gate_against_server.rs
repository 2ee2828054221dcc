//! Health gate tests against real loopback HTTP servers.

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use bluegreen_core::Environment;
use bluegreen_health::{GateConfig, ProbeResult, check_environment, check_routing, http_get, http_probe};

/// Serve `router` on an ephemeral loopback port and return its address.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

fn gate() -> GateConfig {
    GateConfig {
        timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

#[tokio::test]
async fn healthy_service_passes_both_steps() {
    let addr = serve(
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/info", get(|| async { "{}" })),
    )
    .await;

    let verdict = check_environment(&addr, &gate()).await;
    assert!(verdict.healthy, "{}", verdict.summary());
    assert_eq!(verdict.steps.len(), 2);
    assert_eq!(
        verdict.steps[1].result,
        ProbeResult::Healthy { status: 200 }
    );
}

#[tokio::test]
async fn failing_health_skips_info() {
    let addr = serve(
        Router::new()
            .route(
                "/health",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route("/api/info", get(|| async { "{}" })),
    )
    .await;

    let verdict = check_environment(&addr, &gate()).await;
    assert!(!verdict.healthy);
    assert_eq!(verdict.steps.len(), 1);
    assert_eq!(
        verdict.steps[0].result,
        ProbeResult::Unhealthy { status: 503 }
    );
}

#[tokio::test]
async fn missing_info_endpoint_fails_gate() {
    let addr = serve(Router::new().route("/health", get(|| async { "ok" }))).await;

    let verdict = check_environment(&addr, &gate()).await;
    assert!(!verdict.healthy);
    assert_eq!(verdict.steps.len(), 2);
    let failure = verdict.failure().unwrap();
    assert_eq!(failure.path, "/api/info");
    assert_eq!(failure.result, ProbeResult::Unhealthy { status: 404 });
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let addr = serve(Router::new().route(
        "/health",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    ))
    .await;

    let result = http_probe(&addr, "/health", Duration::from_millis(100)).await;
    assert_eq!(result, ProbeResult::Failed);
}

fn info_server(environment: &'static str) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/info",
            get(move || async move { format!(r#"{{"name":"demo-app","environment":"{environment}"}}"#) }),
        )
}

#[tokio::test]
async fn http_get_returns_body_of_success() {
    let addr = serve(info_server("blue")).await;
    let (result, body) = http_get(&addr, "/api/info", Duration::from_secs(2)).await;
    assert_eq!(result, ProbeResult::Healthy { status: 200 });
    let body: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert_eq!(body["environment"], "blue");
}

#[tokio::test]
async fn routing_check_passes_for_expected_environment() {
    let addr = serve(info_server("green")).await;
    let verdict = check_routing(&addr, Environment::Green, &gate()).await;
    assert!(verdict.healthy, "{}", verdict.summary());
}

#[tokio::test]
async fn routing_check_catches_wrong_environment() {
    let addr = serve(info_server("blue")).await;

    // The plain gate only looks at status codes.
    assert!(check_environment(&addr, &gate()).await.healthy);

    let verdict = check_routing(&addr, Environment::Green, &gate()).await;
    assert!(!verdict.healthy);
    assert_eq!(
        verdict.failure().unwrap().result,
        ProbeResult::Misrouted { status: 200 }
    );
    assert!(verdict.summary().contains("wrong environment"));
}

#[tokio::test]
async fn routing_check_accepts_info_without_environment() {
    let addr = serve(
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/info", get(|| async { "{}" })),
    )
    .await;
    let verdict = check_routing(&addr, Environment::Blue, &gate()).await;
    assert!(verdict.healthy, "{}", verdict.summary());
}
