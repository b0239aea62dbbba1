use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use energy_client::{
    db::consumption_queries,
    domain::{
        consumption::MAX_PAGE_LIMIT, timestamp, ConsumptionReading, ConsumptionStats, NewReading,
        ReadingFilter, ReadingPatch, RegionSummary,
    },
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    api::{
        error::ApiError,
        extract::{AdminUser, ApiJson, ApiPath, ApiQuery, CurrentUser},
        state::AppState,
    },
    transform::{normalize_region, timestamp_in_range},
};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub end_date: Option<OffsetDateTime>,
    pub region: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start_date: OffsetDateTime,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub end_date: OffsetDateTime,
    pub region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub end_date: Option<OffsetDateTime>,
    pub region: Option<String>,
}

pub(crate) fn check_range(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Result<(), ApiError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ApiError::Unprocessable("start_date must not be after end_date".to_string()));
        }
    }
    Ok(())
}

pub(crate) fn check_page(limit: Option<i64>, offset: Option<i64>) -> Result<(i64, i64), ApiError> {
    if let Some(limit) = limit {
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(ApiError::Unprocessable(format!("limit must be between 1 and {MAX_PAGE_LIMIT}")));
        }
    }
    if offset.is_some_and(|o| o < 0) {
        return Err(ApiError::Unprocessable("offset must not be negative".to_string()));
    }
    Ok(energy_client::domain::consumption::page(limit, offset))
}

fn check_consumption(value: f64) -> Result<(), ApiError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ApiError::Unprocessable("consumption_mwh must be greater than 0".to_string()));
    }
    Ok(())
}

fn check_region(region: &str) -> Result<String, ApiError> {
    if region.trim().is_empty() {
        return Err(ApiError::Unprocessable("region must not be empty".to_string()));
    }
    Ok(normalize_region(region))
}

fn check_temperature(value: Option<f64>) -> Result<(), ApiError> {
    if value.is_some_and(|t| !t.is_finite()) {
        return Err(ApiError::Unprocessable("temperature must be finite".to_string()));
    }
    Ok(())
}

fn check_timestamp(ts: OffsetDateTime) -> Result<(), ApiError> {
    if !timestamp_in_range(ts) {
        return Err(ApiError::Unprocessable(
            "timestamp must be between 2000-01-01 and 2100-01-01".to_string(),
        ));
    }
    Ok(())
}

fn validate_new(mut reading: NewReading) -> Result<NewReading, ApiError> {
    check_timestamp(reading.ts)?;
    check_consumption(reading.consumption_mwh)?;
    check_temperature(reading.temperature)?;
    reading.region = check_region(&reading.region)?;
    Ok(reading)
}

fn validate_patch(mut patch: ReadingPatch) -> Result<ReadingPatch, ApiError> {
    if let Some(ts) = patch.ts {
        check_timestamp(ts)?;
    }
    if let Some(v) = patch.consumption_mwh {
        check_consumption(v)?;
    }
    if let Some(t) = patch.temperature {
        check_temperature(t)?;
    }
    if let Some(region) = &patch.region {
        patch.region = Some(check_region(region)?);
    }
    Ok(patch)
}

pub async fn create_reading(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiJson(reading): ApiJson<NewReading>,
) -> Result<(StatusCode, Json<ConsumptionReading>), ApiError> {
    let reading = validate_new(reading)?;
    let created = consumption_queries::insert_reading(&state.pool, &reading).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_readings(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<ConsumptionReading>>, ApiError> {
    check_range(params.start_date, params.end_date)?;
    let (limit, offset) = check_page(params.limit, params.offset)?;

    let filter = ReadingFilter {
        start: params.start_date,
        end: params.end_date,
        region: params.region.as_deref().map(normalize_region),
        limit,
        offset,
    };
    let rows = consumption_queries::list_readings(&state.pool, &filter).await?;
    Ok(Json(rows))
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<SummaryParams>,
) -> Result<Json<Vec<RegionSummary>>, ApiError> {
    check_range(Some(params.start_date), Some(params.end_date))?;
    let region = params.region.as_deref().map(normalize_region);
    let rows =
        consumption_queries::region_summary(&state.pool, params.start_date, params.end_date, region.as_deref())
            .await?;
    Ok(Json(rows))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiQuery(params): ApiQuery<StatsParams>,
) -> Result<Json<ConsumptionStats>, ApiError> {
    check_range(params.start_date, params.end_date)?;
    let region = params.region.as_deref().map(normalize_region);
    let stats =
        consumption_queries::consumption_stats(&state.pool, params.start_date, params.end_date, region.as_deref())
            .await?;
    Ok(Json(stats))
}

pub async fn regions(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(consumption_queries::distinct_regions(&state.pool).await?))
}

pub async fn get_reading(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ConsumptionReading>, ApiError> {
    consumption_queries::get_reading(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("consumption record"))
}

pub async fn update_reading(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<ReadingPatch>,
) -> Result<Json<ConsumptionReading>, ApiError> {
    let patch = validate_patch(patch)?;
    let updated = if patch.is_empty() {
        consumption_queries::get_reading(&state.pool, id).await?
    } else {
        consumption_queries::update_reading(&state.pool, id, &patch).await?
    };
    updated
        .map(Json)
        .ok_or_else(|| ApiError::not_found("consumption record"))
}

pub async fn delete_reading(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    if !consumption_queries::delete_reading(&state.pool, id).await? {
        return Err(ApiError::not_found("consumption record"));
    }
    tracing::info!(id, by = %admin.username, "consumption record deleted");
    Ok(StatusCode::NO_CONTENT)
}
