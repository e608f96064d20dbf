//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub chunk_store: CheckResult,
    pub vector_index: CheckResult,
    pub generator: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn up(detail: impl Into<String>) -> Self {
        Self {
            status: "up".to_string(),
            latency_ms: None,
            detail: Some(detail.into()),
            error: None,
        }
    }
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: citeforge_common::VERSION.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check - checks all dependencies
///
/// A disabled vector index is reported but does not fail readiness: BM25
/// still answers every mode.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let components = &state.components;

    let chunk_store = CheckResult::up(format!(
        "{} chunks from {} sources",
        components.store.len(),
        components.store.source_count()
    ));

    let vector_index = match &components.index {
        None => CheckResult {
            status: "disabled".to_string(),
            latency_ms: None,
            detail: None,
            error: None,
        },
        Some(index) => {
            let start = std::time::Instant::now();
            match index.health().await {
                Ok(()) => CheckResult {
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    ..CheckResult::up(index.name())
                },
                Err(e) => CheckResult {
                    status: "down".to_string(),
                    latency_ms: None,
                    detail: Some(index.name().to_string()),
                    error: Some(e.to_string()),
                },
            }
        }
    };

    let generator = CheckResult::up(components.pipeline.generator_name());

    let all_healthy = vector_index.status != "down";
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                chunk_store,
                vector_index,
                generator,
            },
        }),
    )
}
