use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use super::timestamp;

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// A stored consumption reading. There is at most one per (ts, region).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ConsumptionReading {
    pub id: i64,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub region: String,
    pub consumption_mwh: f64,
    pub temperature: Option<f64>,
    pub is_holiday: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A reading as submitted by the API or produced by an ETL source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    #[serde(
        rename = "timestamp",
        deserialize_with = "timestamp::deserialize",
        serialize_with = "time::serde::rfc3339::serialize"
    )]
    pub ts: OffsetDateTime,
    pub region: String,
    pub consumption_mwh: f64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub is_holiday: bool,
}

/// Partial update. Absent fields keep their stored value; `temperature: null`
/// clears the temperature.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReadingPatch {
    #[serde(rename = "timestamp", default, deserialize_with = "timestamp::option::deserialize")]
    pub ts: Option<OffsetDateTime>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub consumption_mwh: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    pub temperature: Option<Option<f64>>,
    #[serde(default)]
    pub is_holiday: Option<bool>,
}

impl ReadingPatch {
    pub fn is_empty(&self) -> bool {
        self.ts.is_none()
            && self.region.is_none()
            && self.consumption_mwh.is_none()
            && self.temperature.is_none()
            && self.is_holiday.is_none()
    }
}

// Distinguishes an explicit `null` (Some(None)) from a missing key (None, via `default`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingFilter {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub region: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Normalises user-supplied pagination into `(limit, offset)`.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RegionSummary {
    pub region: String,
    pub count: i64,
    pub total_consumption: f64,
    pub avg_consumption: f64,
    pub min_consumption: f64,
    pub max_consumption: f64,
    pub avg_temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionStats {
    pub total_consumption: f64,
    pub avg_consumption: f64,
    pub min_consumption: f64,
    pub max_consumption: f64,
    pub record_count: i64,
    pub regions: Vec<String>,
}
