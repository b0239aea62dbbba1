use std::{sync::Arc, time::Instant};

use axum::{extract::State, http::StatusCode, Json};
use energy_client::db;
use serde::Serialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::api::{error::ApiError, state::AppState};

const SERVICE: &str = "analytics-service";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Energy Analytics API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: now_rfc3339(),
    })
}

pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    db::ping(&state.pool).await.map_err(|e| {
        tracing::warn!(error = %e, "readiness check failed");
        ApiError::Unavailable("database unavailable".to_string())
    })?;
    Ok(Json(json!({ "status": "ready" })))
}

pub async fn detailed(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let started = Instant::now();
    let database = match db::ping(&state.pool).await {
        Ok(()) => json!({
            "status": "healthy",
            "latency_ms": started.elapsed().as_secs_f64() * 1000.0,
        }),
        Err(e) => json!({ "status": "unhealthy", "error": e.to_string() }),
    };
    let healthy = database["status"] == "healthy";

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": SERVICE,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "checks": { "database": database },
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
