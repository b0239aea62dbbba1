use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Human review state of a detected anomaly, stored as `-1 / 0 / 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    #[default]
    Unconfirmed,
    Confirmed,
    FalsePositive,
}

#[derive(thiserror::Error, Debug)]
#[error("invalid confirmation value {0}")]
pub struct InvalidConfirmation(pub i16);

impl ConfirmationStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            ConfirmationStatus::Unconfirmed => 0,
            ConfirmationStatus::Confirmed => 1,
            ConfirmationStatus::FalsePositive => -1,
        }
    }
}

impl TryFrom<i16> for ConfirmationStatus {
    type Error = InvalidConfirmation;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ConfirmationStatus::Unconfirmed),
            1 => Ok(ConfirmationStatus::Confirmed),
            -1 => Ok(ConfirmationStatus::FalsePositive),
            other => Err(InvalidConfirmation(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Anomaly {
    pub id: i64,
    #[serde(rename = "timestamp", with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub region: String,
    pub actual_value: f64,
    pub predicted_value: f64,
    pub anomaly_score: f64,
    #[sqlx(rename = "is_confirmed", try_from = "i16")]
    pub status: ConfirmationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Anomaly produced by the detector; written only by the ML layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnomaly {
    pub ts: OffsetDateTime,
    pub region: String,
    pub actual_value: f64,
    pub predicted_value: f64,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyFilter {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub region: Option<String>,
    pub status: Option<ConfirmationStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RegionCount {
    pub region: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyStats {
    pub total_anomalies: i64,
    pub confirmed_anomalies: i64,
    pub false_positives: i64,
    pub unconfirmed_anomalies: i64,
    /// Mean absolute score; `None` when the window has no anomalies.
    pub avg_anomaly_score: Option<f64>,
    pub top_regions: Vec<RegionCount>,
}
