//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub backends: BTreeMap<String, CheckResult>,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: integrity_common::VERSION,
    })
}

/// Readiness probe - every backend must answer its ping
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = Instant::now();
    let probes = state.pipeline.registry().ping_all().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let backends: BTreeMap<String, CheckResult> = probes
        .into_iter()
        .map(|(backend, result)| {
            let check = match result {
                Ok(()) => CheckResult {
                    status: "up".to_string(),
                    latency_ms: Some(latency_ms),
                    error: None,
                },
                Err(e) => CheckResult {
                    status: "down".to_string(),
                    latency_ms: None,
                    error: Some(e.to_string()),
                },
            };
            (backend.to_string(), check)
        })
        .collect();

    let all_up = !backends.is_empty() && backends.values().all(|c| c.status == "up");
    let status = if all_up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(ReadyResponse {
            status: if all_up { "ready" } else { "not_ready" }.to_string(),
            backends,
        }),
    )
}

#[cfg(test)]
mod tests {
    use crate::test_support::{app, json_body};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use integrity_common::config::AppConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_ready_lists_every_backend() {
        let response = app(AppConfig::default())
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["backends"]["livelink"]["status"], "up");
    }
}
