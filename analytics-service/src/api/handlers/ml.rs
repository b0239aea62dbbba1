use std::sync::Arc;

use axum::{
    extract::State,
    Json,
};
use energy_client::domain::{timestamp, Anomaly, AnomalyFilter, AnomalyStats, ConfirmationStatus};
use serde::Deserialize;
use time::OffsetDateTime;

use super::consumption::{check_page, check_range};
use crate::{
    api::{
        error::ApiError,
        extract::{ApiJson, ApiPath, ApiQuery, CurrentUser},
        state::AppState,
    },
    ml::service::{
        AnomalyStatsRequest, DetectAnomaliesRequest, DetectAnomaliesResponse, ForecastRequest, ForecastResponse,
    },
    transform::normalize_region,
};

pub async fn detect_anomalies(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiJson(mut req): ApiJson<DetectAnomaliesRequest>,
) -> Result<Json<DetectAnomaliesResponse>, ApiError> {
    req.region = req.region.as_deref().map(normalize_region);
    tracing::info!(by = %user.username, region = ?req.region, method = ?req.method, "anomaly detection requested");
    Ok(Json(state.ml.detect_anomalies(req).await?))
}

pub async fn forecast(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiJson(mut req): ApiJson<ForecastRequest>,
) -> Result<Json<ForecastResponse>, ApiError> {
    req.region = req.region.as_deref().map(normalize_region);
    Ok(Json(state.ml.forecast(req).await?))
}

pub async fn anomaly_stats(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiJson(mut req): ApiJson<AnomalyStatsRequest>,
) -> Result<Json<AnomalyStats>, ApiError> {
    req.region = req.region.as_deref().map(normalize_region);
    Ok(Json(state.ml.anomaly_stats(req).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyListParams {
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub end_date: Option<OffsetDateTime>,
    pub region: Option<String>,
    pub status: Option<ConfirmationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_anomalies(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<AnomalyListParams>,
) -> Result<Json<Vec<Anomaly>>, ApiError> {
    check_range(params.start_date, params.end_date)?;
    let (limit, offset) = check_page(params.limit, params.offset)?;
    let filter = AnomalyFilter {
        start: params.start_date,
        end: params.end_date,
        region: params.region.as_deref().map(normalize_region),
        status: params.status,
        limit,
        offset,
    };
    Ok(Json(state.ml.anomalies(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationRequest {
    pub status: ConfirmationStatus,
}

pub async fn set_confirmation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ConfirmationRequest>,
) -> Result<Json<Anomaly>, ApiError> {
    let anomaly = state
        .ml
        .set_confirmation(id, req.status)
        .await?
        .ok_or_else(|| ApiError::not_found("anomaly"))?;
    tracing::info!(id, status = ?req.status, by = %user.username, "anomaly review recorded");
    Ok(Json(anomaly))
}
