use std::collections::BTreeMap;

use energy_client::{
    db::{anomaly_queries, consumption_queries},
    domain::{timestamp, Anomaly, AnomalyFilter, AnomalyStats, ConfirmationStatus, NewAnomaly},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{
    anomaly::{AnomalyDetector, DetectionMethod, DetectorConfig, ScoredPoint},
    backtest::{self, Fold, MAX_CV_SPLITS},
    metrics::{self as model_metrics, ModelMetrics},
    models::{self, ModelKind, ModelParams},
    series::{group_by_region, TimeSeries},
    MlError,
};
use crate::config::MlConfig;

pub const MAX_FORECAST_PERIODS: usize = 720;

/// Per-request overrides of the configured model settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelOverrides {
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub season_length: Option<usize>,
    pub threshold_std: Option<f64>,
    pub z_threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectAnomaliesRequest {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start_date: OffsetDateTime,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub end_date: OffsetDateTime,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub method: DetectionMethod,
    #[serde(default)]
    pub model_type: ModelKind,
    #[serde(default)]
    pub model_params: ModelOverrides,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionDetection {
    pub metrics: ModelMetrics,
    pub threshold: f64,
    pub points: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectAnomaliesResponse {
    /// Every scored point, flagged or not.
    pub anomalies: Vec<ScoredPoint>,
    pub metrics: BTreeMap<String, RegionDetection>,
    /// Regions left out because their series was too short.
    pub skipped_regions: Vec<String>,
    pub persisted: u64,
}

fn default_periods() -> usize {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start_date: OffsetDateTime,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub end_date: OffsetDateTime,
    #[serde(default = "default_periods")]
    pub n_periods: usize,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub model_type: ModelKind,
    #[serde(default)]
    pub model_params: ModelOverrides,
    /// Expanding-window backtest folds to report alongside the forecast.
    #[serde(default)]
    pub cv_splits: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub forecast: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub model_type: ModelKind,
    /// The estimator actually fitted; short series fall back to `holt`.
    pub fitted_model: &'static str,
    pub region: Option<String>,
    pub forecast: Vec<ForecastPoint>,
    pub metrics: ModelMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<Vec<Fold>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyStatsRequest {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start_date: OffsetDateTime,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub end_date: OffsetDateTime,
    #[serde(default)]
    pub region: Option<String>,
}

fn check_window(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), MlError> {
    if start > end {
        return Err(MlError::invalid("start_date", "must not be after end_date"));
    }
    Ok(())
}

/// Loads readings, runs the models off the async runtime and persists results.
/// Readings are only ever read here.
#[derive(Clone)]
pub struct MlService {
    pool: PgPool,
    cfg: MlConfig,
}

impl MlService {
    pub fn new(pool: PgPool, cfg: MlConfig) -> Self {
        Self { pool, cfg }
    }

    fn params(&self, overrides: &ModelOverrides) -> ModelParams {
        let base = ModelParams::from(&self.cfg);
        ModelParams {
            alpha: overrides.alpha.unwrap_or(base.alpha),
            beta: overrides.beta.unwrap_or(base.beta),
            gamma: overrides.gamma.unwrap_or(base.gamma),
            season_length: overrides.season_length.unwrap_or(base.season_length),
        }
    }

    fn detector_config(&self, req: &DetectAnomaliesRequest) -> DetectorConfig {
        DetectorConfig {
            method: req.method,
            model: req.model_type,
            params: self.params(&req.model_params),
            threshold_std: req.model_params.threshold_std.unwrap_or(self.cfg.threshold_std),
            z_threshold: req.model_params.z_threshold.unwrap_or(self.cfg.z_threshold),
            test_size: self.cfg.test_size,
        }
    }

    pub async fn detect_anomalies(&self, req: DetectAnomaliesRequest) -> Result<DetectAnomaliesResponse, MlError> {
        check_window(req.start_date, req.end_date)?;
        // Surface unsupported models before touching the database.
        models::build(req.model_type, self.params(&req.model_params))?;

        let readings =
            consumption_queries::load_window(&self.pool, req.start_date, req.end_date, req.region.as_deref())
                .await?;
        if readings.is_empty() {
            return Err(MlError::NoData);
        }

        let detector = AnomalyDetector::new(self.detector_config(&req));
        let min_points = self.cfg.min_points;
        let single_region = req.region.is_some();

        let (detections, skipped_regions) = tokio::task::spawn_blocking(move || {
            let mut detections = BTreeMap::new();
            let mut skipped = Vec::new();
            for (region, rows) in group_by_region(readings) {
                let series = TimeSeries::from_readings(&rows);
                if series.len() < min_points {
                    if single_region {
                        return Err(MlError::InsufficientData {
                            required: min_points,
                            actual: series.len(),
                        });
                    }
                    tracing::warn!(region = %region, points = series.len(), "skipping region with too few points");
                    skipped.push(region);
                    continue;
                }
                let detection = detector.detect(&region, &series)?;
                detections.insert(region, detection);
            }
            Ok((detections, skipped))
        })
        .await
        .map_err(|e| MlError::Task(e.to_string()))??;

        if detections.is_empty() {
            return Err(MlError::InsufficientData {
                required: min_points,
                actual: 0,
            });
        }

        let new_anomalies: Vec<NewAnomaly> = detections
            .values()
            .flat_map(|d| d.anomalies())
            .map(|p| NewAnomaly {
                ts: p.timestamp,
                region: p.region.clone(),
                actual_value: p.actual,
                predicted_value: p.predicted,
                anomaly_score: p.error,
            })
            .collect();
        let persisted = anomaly_queries::upsert_anomalies(&self.pool, &new_anomalies).await?;
        metrics::counter!("ml_anomalies_detected_total").increment(new_anomalies.len() as u64);

        tracing::info!(
            regions = detections.len(),
            anomalies = new_anomalies.len(),
            persisted,
            "anomaly detection finished"
        );

        let mut metrics = BTreeMap::new();
        let mut points = Vec::new();
        for (region, detection) in detections {
            metrics.insert(
                region,
                RegionDetection {
                    metrics: detection.metrics,
                    threshold: detection.threshold,
                    points: detection.points.len(),
                    anomalies: detection.anomalies().count(),
                },
            );
            points.extend(detection.points);
        }

        Ok(DetectAnomaliesResponse {
            anomalies: points,
            metrics,
            skipped_regions,
            persisted,
        })
    }

    pub async fn forecast(&self, req: ForecastRequest) -> Result<ForecastResponse, MlError> {
        check_window(req.start_date, req.end_date)?;
        if req.n_periods == 0 || req.n_periods > MAX_FORECAST_PERIODS {
            return Err(MlError::invalid(
                "n_periods",
                format!("must be between 1 and {MAX_FORECAST_PERIODS}"),
            ));
        }
        if req.cv_splits.is_some_and(|k| k == 0 || k > MAX_CV_SPLITS) {
            return Err(MlError::invalid(
                "cv_splits",
                format!("must be between 1 and {MAX_CV_SPLITS}"),
            ));
        }
        let params = self.params(&req.model_params);
        models::build(req.model_type, params)?;

        let readings =
            consumption_queries::load_window(&self.pool, req.start_date, req.end_date, req.region.as_deref())
                .await?;
        if readings.is_empty() {
            return Err(MlError::NoData);
        }
        let series = TimeSeries::from_readings(&readings);
        if series.len() < self.cfg.min_points {
            return Err(MlError::InsufficientData {
                required: self.cfg.min_points,
                actual: series.len(),
            });
        }

        let kind = req.model_type;
        let horizon = req.n_periods;
        let cv_splits = req.cv_splits;
        let test_size = self.cfg.test_size;

        let (values, metrics, fitted_model, cross_validation) = tokio::task::spawn_blocking(move || {
            let (train, test) = series.split(test_size)?;
            let mut model = models::build(kind, params)?;
            model.fit(&train.values)?;
            let holdout = model.forecast(test.len())?;
            let metrics = model_metrics::evaluate(&test.values, &holdout);

            let cross_validation = cv_splits
                .map(|k| backtest::cross_validate(&series, kind, params, k))
                .transpose()?;

            let mut model = models::build(kind, params)?;
            model.fit(&series.values)?;
            let values = model.forecast(horizon)?;
            let points: Vec<_> = series.future_timestamps(horizon)?.into_iter().zip(values).collect();
            Ok::<_, MlError>((points, metrics, model.name(), cross_validation))
        })
        .await
        .map_err(|e| MlError::Task(e.to_string()))??;

        tracing::info!(
            model = kind.as_str(),
            fitted_model,
            horizon,
            region = ?req.region,
            "forecast finished"
        );

        Ok(ForecastResponse {
            model_type: kind,
            fitted_model,
            region: req.region,
            forecast: values
                .into_iter()
                .map(|(timestamp, forecast)| ForecastPoint { timestamp, forecast })
                .collect(),
            metrics,
            cross_validation,
        })
    }

    pub async fn anomaly_stats(&self, req: AnomalyStatsRequest) -> Result<AnomalyStats, MlError> {
        check_window(req.start_date, req.end_date)?;
        let stats =
            anomaly_queries::anomaly_stats(&self.pool, req.start_date, req.end_date, req.region.as_deref()).await?;
        Ok(stats)
    }

    pub async fn anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, MlError> {
        Ok(anomaly_queries::list_anomalies(&self.pool, filter).await?)
    }

    pub async fn set_confirmation(&self, id: i64, status: ConfirmationStatus) -> Result<Option<Anomaly>, MlError> {
        Ok(anomaly_queries::set_confirmation(&self.pool, id, status).await?)
    }
}
