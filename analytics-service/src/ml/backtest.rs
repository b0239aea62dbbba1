//! Expanding-window backtesting of a forecaster.
//!
//! Fold `i` of `n_splits` trains on the first `n * (i + 1) / (n_splits + 1)`
//! points and forecasts the remainder of the series.

use serde::Serialize;

use super::{
    metrics::{self, ModelMetrics},
    models::{self, ModelKind, ModelParams},
    series::TimeSeries,
    MlError,
};

pub const MAX_CV_SPLITS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fold {
    pub train_size: usize,
    pub test_size: usize,
    pub metrics: ModelMetrics,
}

pub fn cross_validate(
    series: &TimeSeries,
    kind: ModelKind,
    params: ModelParams,
    n_splits: usize,
) -> Result<Vec<Fold>, MlError> {
    if !(1..=MAX_CV_SPLITS).contains(&n_splits) {
        return Err(MlError::invalid(
            "cv_splits",
            format!("must be between 1 and {MAX_CV_SPLITS}"),
        ));
    }
    let n = series.len();
    // Every fold needs at least two training and two test points.
    let required = 2 * (n_splits + 1);
    if n < required {
        return Err(MlError::InsufficientData { required, actual: n });
    }

    (0..n_splits)
        .map(|i| {
            let train_size = n * (i + 1) / (n_splits + 1);
            let (train, test) = series.values.split_at(train_size);

            let mut model = models::build(kind, params)?;
            model.fit(train)?;
            let predicted = model.forecast(test.len())?;

            Ok(Fold {
                train_size,
                test_size: test.len(),
                metrics: metrics::evaluate(test, &predicted),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{macros::datetime, Duration};

    fn hourly(values: Vec<f64>) -> TimeSeries {
        let base = datetime!(2024-01-01 00:00:00 UTC);
        let timestamps = (0..values.len()).map(|h| base + Duration::hours(h as i64)).collect();
        TimeSeries::new(timestamps, values)
    }

    fn params() -> ModelParams {
        ModelParams {
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.2,
            season_length: 4,
        }
    }

    #[test]
    fn folds_expand_the_training_window() {
        let series = hourly((0..60).map(|i| 10.0 + i as f64).collect());
        let folds = cross_validate(&series, ModelKind::Holt, params(), 5).unwrap();

        let sizes: Vec<_> = folds.iter().map(|f| (f.train_size, f.test_size)).collect();
        assert_eq!(sizes, vec![(10, 50), (20, 40), (30, 30), (40, 20), (50, 10)]);
        // A linear series is forecast exactly by Holt.
        assert!(folds.iter().all(|f| f.metrics.mae < 1e-6));
    }

    #[test]
    fn short_series_and_bad_split_counts_are_rejected() {
        let series = hourly(vec![1.0; 7]);
        assert!(matches!(
            cross_validate(&series, ModelKind::Holt, params(), 3),
            Err(MlError::InsufficientData { required: 8, actual: 7 })
        ));
        assert!(matches!(
            cross_validate(&series, ModelKind::Holt, params(), 0),
            Err(MlError::InvalidParameter { .. })
        ));
        assert!(matches!(
            cross_validate(&series, ModelKind::Holt, params(), MAX_CV_SPLITS + 1),
            Err(MlError::InvalidParameter { .. })
        ));
    }
}
