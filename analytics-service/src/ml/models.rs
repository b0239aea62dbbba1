//! Smoothing forecasters.
//!
//! - **Holt**: level + linear trend.
//! - **Holt-Winters** (`exponential_smoothing`): additive level, trend and season.
//!   Series shorter than two seasons are fitted with Holt instead.
//! - **Seasonal naive**: repeats the value one season back.
//!
//! All models expose one-step-ahead in-sample predictions through
//! [`Forecaster::fitted_values`]; anomaly scoring works on those residuals.

use serde::{Deserialize, Serialize};

use super::MlError;
use crate::config::MlConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    ExponentialSmoothing,
    Holt,
    SeasonalNaive,
    Prophet,
    Arima,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::ExponentialSmoothing => "exponential_smoothing",
            ModelKind::Holt => "holt",
            ModelKind::SeasonalNaive => "seasonal_naive",
            ModelKind::Prophet => "prophet",
            ModelKind::Arima => "arima",
        }
    }
}

/// One year of hourly observations.
pub const MAX_SEASON_LENGTH: usize = 8760;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub season_length: usize,
}

impl From<&MlConfig> for ModelParams {
    fn from(cfg: &MlConfig) -> Self {
        Self {
            alpha: cfg.alpha,
            beta: cfg.beta,
            gamma: cfg.gamma,
            season_length: cfg.season_length,
        }
    }
}

impl ModelParams {
    fn validate(&self) -> Result<(), MlError> {
        for (name, v) in [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(MlError::invalid(name, "must be between 0 and 1 (exclusive)"));
            }
        }
        if !(1..=MAX_SEASON_LENGTH).contains(&self.season_length) {
            return Err(MlError::invalid(
                "season_length",
                format!("must be between 1 and {MAX_SEASON_LENGTH}"),
            ));
        }
        Ok(())
    }
}

pub trait Forecaster: Send {
    fn fit(&mut self, values: &[f64]) -> Result<(), MlError>;

    /// One-step-ahead predictions for every training point.
    fn fitted_values(&self) -> &[f64];

    fn forecast(&self, horizon: usize) -> Result<Vec<f64>, MlError>;

    fn name(&self) -> &'static str;
}

pub fn build(kind: ModelKind, params: ModelParams) -> Result<Box<dyn Forecaster>, MlError> {
    params.validate()?;
    match kind {
        ModelKind::ExponentialSmoothing => Ok(Box::new(HoltWinters::new(params))),
        ModelKind::Holt => Ok(Box::new(Holt::new(params.alpha, params.beta))),
        ModelKind::SeasonalNaive => Ok(Box::new(SeasonalNaive::new(params.season_length))),
        ModelKind::Prophet | ModelKind::Arima => Err(MlError::UnsupportedModel(kind.as_str().to_string())),
    }
}

fn require(n: usize, required: usize) -> Result<(), MlError> {
    if n < required {
        return Err(MlError::InsufficientData { required, actual: n });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Holt {
    alpha: f64,
    beta: f64,
    level: f64,
    trend: f64,
    fitted: Vec<f64>,
}

impl Holt {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            level: 0.0,
            trend: 0.0,
            fitted: Vec::new(),
        }
    }
}

impl Forecaster for Holt {
    fn fit(&mut self, values: &[f64]) -> Result<(), MlError> {
        require(values.len(), 2)?;

        self.level = values[0];
        self.trend = values[1] - values[0];
        self.fitted = Vec::with_capacity(values.len());
        self.fitted.push(values[0]);

        for &y in &values[1..] {
            self.fitted.push(self.level + self.trend);
            let prev_level = self.level;
            self.level = self.alpha * y + (1.0 - self.alpha) * (self.level + self.trend);
            self.trend = self.beta * (self.level - prev_level) + (1.0 - self.beta) * self.trend;
        }
        Ok(())
    }

    fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    fn forecast(&self, horizon: usize) -> Result<Vec<f64>, MlError> {
        if self.fitted.is_empty() {
            return Err(MlError::NotFitted);
        }
        Ok((1..=horizon).map(|h| self.level + h as f64 * self.trend).collect())
    }

    fn name(&self) -> &'static str {
        "holt"
    }
}

#[derive(Debug, Clone)]
pub struct HoltWinters {
    params: ModelParams,
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    fitted: Vec<f64>,
    n: usize,
    fallback: Option<Holt>,
}

impl HoltWinters {
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            level: 0.0,
            trend: 0.0,
            seasonal: Vec::new(),
            fitted: Vec::new(),
            n: 0,
            fallback: None,
        }
    }
}

impl Forecaster for HoltWinters {
    fn fit(&mut self, values: &[f64]) -> Result<(), MlError> {
        let m = self.params.season_length;
        if m < 2 || values.len() / 2 < m {
            let mut holt = Holt::new(self.params.alpha, self.params.beta);
            holt.fit(values)?;
            self.fallback = Some(holt);
            return Ok(());
        }
        self.fallback = None;

        let ModelParams { alpha, beta, gamma, .. } = self.params;
        let first = values[..m].iter().sum::<f64>() / m as f64;
        let second = values[m..2 * m].iter().sum::<f64>() / m as f64;

        self.level = first;
        self.trend = (second - first) / m as f64;
        self.seasonal = values[..m].iter().map(|y| y - first).collect();
        // The first season only initialises the components.
        self.fitted = values[..m].to_vec();

        for (t, &y) in values.iter().enumerate().skip(m) {
            let s = self.seasonal[t % m];
            self.fitted.push(self.level + self.trend + s);

            let prev_level = self.level;
            self.level = alpha * (y - s) + (1.0 - alpha) * (self.level + self.trend);
            self.trend = beta * (self.level - prev_level) + (1.0 - beta) * self.trend;
            self.seasonal[t % m] = gamma * (y - self.level) + (1.0 - gamma) * s;
        }
        self.n = values.len();
        Ok(())
    }

    fn fitted_values(&self) -> &[f64] {
        match &self.fallback {
            Some(holt) => holt.fitted_values(),
            None => &self.fitted,
        }
    }

    fn forecast(&self, horizon: usize) -> Result<Vec<f64>, MlError> {
        if let Some(holt) = &self.fallback {
            return holt.forecast(horizon);
        }
        if self.fitted.is_empty() {
            return Err(MlError::NotFitted);
        }
        let m = self.seasonal.len();
        Ok((1..=horizon)
            .map(|h| self.level + h as f64 * self.trend + self.seasonal[(self.n + h - 1) % m])
            .collect())
    }

    fn name(&self) -> &'static str {
        match &self.fallback {
            Some(holt) => holt.name(),
            None => "exponential_smoothing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalNaive {
    season_length: usize,
    history: Vec<f64>,
    fitted: Vec<f64>,
    period: usize,
}

impl SeasonalNaive {
    pub fn new(season_length: usize) -> Self {
        Self {
            season_length,
            history: Vec::new(),
            fitted: Vec::new(),
            period: 1,
        }
    }
}

impl Forecaster for SeasonalNaive {
    fn fit(&mut self, values: &[f64]) -> Result<(), MlError> {
        require(values.len(), 1)?;

        // Too short for a full season: plain naive.
        self.period = if values.len() > self.season_length {
            self.season_length
        } else {
            1
        };
        let p = self.period;
        self.fitted = values
            .iter()
            .enumerate()
            .map(|(t, _)| if t >= p { values[t - p] } else { values[0] })
            .collect();
        self.history = values.to_vec();
        Ok(())
    }

    fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    fn forecast(&self, horizon: usize) -> Result<Vec<f64>, MlError> {
        if self.history.is_empty() {
            return Err(MlError::NotFitted);
        }
        let n = self.history.len();
        let p = self.period;
        Ok((0..horizon).map(|h| self.history[n - p + h % p]).collect())
    }

    fn name(&self) -> &'static str {
        "seasonal_naive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(season_length: usize) -> ModelParams {
        ModelParams {
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.2,
            season_length,
        }
    }

    #[test]
    fn holt_tracks_linear_trend() {
        let data: Vec<f64> = (0..20).map(|i| 10.0 + 2.0 * i as f64).collect();
        let mut model = Holt::new(0.5, 0.3);
        model.fit(&data).unwrap();

        assert_eq!(model.fitted_values().len(), data.len());
        let f = model.forecast(3).unwrap();
        assert!((f[0] - 50.0).abs() < 1e-9);
        assert!((f[2] - 54.0).abs() < 1e-9);
    }

    #[test]
    fn holt_winters_learns_repeating_pattern() {
        let pattern = [1.0, 5.0, 9.0, 5.0];
        let data: Vec<f64> = (0..40).map(|i| 100.0 + pattern[i % 4]).collect();

        let mut model = HoltWinters::new(params(4));
        model.fit(&data).unwrap();
        let f = model.forecast(4).unwrap();

        for (h, value) in f.iter().enumerate() {
            assert!((value - (100.0 + pattern[(40 + h) % 4])).abs() < 0.5, "h={h} value={value}");
        }
        assert_eq!(model.fitted_values().len(), 40);
        assert_eq!(model.name(), "exponential_smoothing");
    }

    #[test]
    fn holt_winters_falls_back_to_holt_on_short_series() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut model = HoltWinters::new(params(24));
        model.fit(&data).unwrap();
        assert_eq!(model.fitted_values().len(), 5);
        assert_eq!(model.forecast(2).unwrap().len(), 2);
        assert_eq!(model.name(), "holt");
    }

    #[test]
    fn seasonal_naive_repeats_last_season() {
        let mut model = SeasonalNaive::new(3);
        model.fit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(model.forecast(4).unwrap(), vec![4.0, 5.0, 6.0, 4.0]);
        assert_eq!(model.fitted_values(), &[1.0, 1.0, 1.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn unfitted_model_cannot_forecast() {
        assert!(matches!(Holt::new(0.5, 0.5).forecast(1), Err(MlError::NotFitted)));
    }

    #[test]
    fn library_backed_models_are_rejected() {
        assert!(matches!(build(ModelKind::Prophet, params(24)), Err(MlError::UnsupportedModel(_))));
        assert!(matches!(build(ModelKind::Arima, params(24)), Err(MlError::UnsupportedModel(_))));
        assert!(build(ModelKind::Holt, params(24)).is_ok());
    }

    #[test]
    fn oversized_season_is_rejected() {
        for season_length in [MAX_SEASON_LENGTH + 1, usize::MAX] {
            let res = build(ModelKind::ExponentialSmoothing, params(season_length));
            assert!(matches!(res, Err(MlError::InvalidParameter { .. })));
        }
        assert!(build(ModelKind::ExponentialSmoothing, params(MAX_SEASON_LENGTH)).is_ok());
    }

    #[test]
    fn huge_season_on_unvalidated_model_falls_back_to_holt() {
        let mut model = HoltWinters::new(params(usize::MAX));
        model.fit(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(model.fitted_values().len(), 5);
    }

    #[test]
    fn out_of_range_smoothing_is_rejected() {
        let mut p = params(24);
        p.alpha = 1.5;
        assert!(matches!(build(ModelKind::Holt, p), Err(MlError::InvalidParameter { .. })));
    }
}
