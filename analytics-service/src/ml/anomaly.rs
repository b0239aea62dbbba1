use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{
    metrics::{self, mean_std, ModelMetrics},
    models::{self, ModelKind, ModelParams},
    series::TimeSeries,
    MlError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Residuals of a one-step-ahead forecaster.
    #[default]
    Residual,
    /// Distance from the window mean in standard deviations.
    Zscore,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub method: DetectionMethod,
    pub model: ModelKind,
    pub params: ModelParams,
    pub threshold_std: f64,
    pub z_threshold: f64,
    pub test_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub region: String,
    pub actual: f64,
    pub predicted: f64,
    /// Residual for the residual method, z-score for the z-score method.
    pub error: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub points: Vec<ScoredPoint>,
    pub metrics: ModelMetrics,
    pub threshold: f64,
}

impl Detection {
    pub fn anomalies(&self) -> impl Iterator<Item = &ScoredPoint> {
        self.points.iter().filter(|p| p.is_anomaly)
    }
}

pub struct AnomalyDetector {
    cfg: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    pub fn detect(&self, region: &str, series: &TimeSeries) -> Result<Detection, MlError> {
        if self.cfg.threshold_std <= 0.0 {
            return Err(MlError::invalid("threshold_std", "must be positive"));
        }
        if self.cfg.z_threshold <= 0.0 {
            return Err(MlError::invalid("z_threshold", "must be positive"));
        }
        match self.cfg.method {
            DetectionMethod::Residual => self.detect_residual(region, series),
            DetectionMethod::Zscore => self.detect_zscore(region, series),
        }
    }

    fn holdout_metrics(&self, series: &TimeSeries) -> Result<ModelMetrics, MlError> {
        let (train, test) = series.split(self.cfg.test_size)?;
        let predicted = match self.cfg.method {
            DetectionMethod::Residual => {
                let mut model = models::build(self.cfg.model, self.cfg.params)?;
                model.fit(&train.values)?;
                model.forecast(test.len())?
            }
            DetectionMethod::Zscore => {
                let (mean, _) = mean_std(&train.values);
                vec![mean; test.len()]
            }
        };
        Ok(metrics::evaluate(&test.values, &predicted))
    }

    fn detect_residual(&self, region: &str, series: &TimeSeries) -> Result<Detection, MlError> {
        let mut model = models::build(self.cfg.model, self.cfg.params)?;
        model.fit(&series.values)?;
        let fitted = model.fitted_values();

        let residuals: Vec<f64> = series.values.iter().zip(fitted).map(|(a, p)| a - p).collect();
        let (mean, std) = mean_std(&residuals);
        let threshold = self.cfg.threshold_std * std;

        let points = series
            .timestamps
            .iter()
            .zip(&series.values)
            .zip(fitted.iter().zip(&residuals))
            .map(|((&timestamp, &actual), (&predicted, &error))| ScoredPoint {
                timestamp,
                region: region.to_string(),
                actual,
                predicted,
                error,
                is_anomaly: std > 0.0 && (error - mean).abs() > threshold,
            })
            .collect();

        Ok(Detection {
            points,
            metrics: self.holdout_metrics(series)?,
            threshold,
        })
    }

    fn detect_zscore(&self, region: &str, series: &TimeSeries) -> Result<Detection, MlError> {
        let (mean, std) = mean_std(&series.values);
        let z = self.cfg.z_threshold;

        let points = series
            .timestamps
            .iter()
            .zip(&series.values)
            .map(|(&timestamp, &actual)| {
                let score = if std > 0.0 { (actual - mean) / std } else { 0.0 };
                ScoredPoint {
                    timestamp,
                    region: region.to_string(),
                    actual,
                    predicted: mean,
                    error: score,
                    is_anomaly: score.abs() > z,
                }
            })
            .collect();

        Ok(Detection {
            points,
            metrics: self.holdout_metrics(series)?,
            threshold: z,
        })
    }
}
