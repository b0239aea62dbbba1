//! Forecasting and anomaly detection over stored consumption readings.
//!
//! The estimators here are small self-contained smoothing models behind the
//! [`models::Forecaster`] trait. [`service::MlService`] is the database-facing
//! adapter: it loads a window of readings, runs the CPU-bound fitting on the
//! blocking pool and persists detected anomalies.

pub mod anomaly;
pub mod backtest;
pub mod metrics;
pub mod models;
pub mod series;
pub mod service;

use energy_client::StoreError;

pub use anomaly::{AnomalyDetector, DetectionMethod, DetectorConfig, ScoredPoint};
pub use backtest::{cross_validate, Fold};
pub use metrics::ModelMetrics;
pub use models::{Forecaster, ModelKind, ModelParams};
pub use series::TimeSeries;
pub use service::MlService;

#[derive(thiserror::Error, Debug)]
pub enum MlError {
    #[error("no data found for the specified criteria")]
    NoData,
    #[error("insufficient data: need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("model '{0}' is not supported by this service")]
    UnsupportedModel(String),
    #[error("model has not been fitted")]
    NotFitted,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("model task failed: {0}")]
    Task(String),
}

impl MlError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        MlError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
