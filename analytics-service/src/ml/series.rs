use std::collections::BTreeMap;

use energy_client::domain::ConsumptionReading;
use time::{Duration, OffsetDateTime};

use super::MlError;

/// A regularly-indexed univariate series: one value per timestamp, ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub timestamps: Vec<OffsetDateTime>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(timestamps: Vec<OffsetDateTime>, values: Vec<f64>) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        Self { timestamps, values }
    }

    /// Sums readings that share a timestamp, so a multi-region window becomes
    /// a single total-consumption series.
    pub fn from_readings(readings: &[ConsumptionReading]) -> Self {
        let mut by_ts: BTreeMap<OffsetDateTime, f64> = BTreeMap::new();
        for r in readings {
            *by_ts.entry(r.ts).or_insert(0.0) += r.consumption_mwh;
        }
        let (timestamps, values) = by_ts.into_iter().unzip();
        Self { timestamps, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Median spacing between observations; one hour when it cannot be inferred.
    pub fn step(&self) -> Duration {
        let mut gaps: Vec<Duration> = self
            .timestamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| d.is_positive())
            .collect();
        if gaps.is_empty() {
            return Duration::HOUR;
        }
        gaps.sort();
        gaps[gaps.len() / 2]
    }

    /// Train/test split with `train = floor(n * (1 - test_size))`, kept so both
    /// halves are non-empty.
    pub fn split(&self, test_size: f64) -> Result<(TimeSeries, TimeSeries), MlError> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(MlError::invalid("test_size", "must be between 0 and 1 (exclusive)"));
        }
        let n = self.len();
        if n < 2 {
            return Err(MlError::InsufficientData { required: 2, actual: n });
        }

        let train = ((n as f64) * (1.0 - test_size)).floor() as usize;
        let train = train.clamp(1, n - 1);

        Ok((
            TimeSeries::new(self.timestamps[..train].to_vec(), self.values[..train].to_vec()),
            TimeSeries::new(self.timestamps[train..].to_vec(), self.values[train..].to_vec()),
        ))
    }

    /// `horizon` timestamps continuing after the last observation. Fails when
    /// the horizon runs past the representable date range.
    pub fn future_timestamps(&self, horizon: usize) -> Result<Vec<OffsetDateTime>, MlError> {
        let Some(&last) = self.timestamps.last() else {
            return Ok(Vec::new());
        };
        let step = self.step();
        let out_of_range = || MlError::invalid("n_periods", "forecast horizon runs past the supported date range");
        let horizon = i32::try_from(horizon).map_err(|_| out_of_range())?;
        (1..=horizon)
            .map(|k| {
                step.checked_mul(k)
                    .and_then(|offset| last.checked_add(offset))
                    .ok_or_else(out_of_range)
            })
            .collect()
    }
}

/// Groups a time-ordered window by region, preserving order within each group.
pub fn group_by_region(readings: Vec<ConsumptionReading>) -> BTreeMap<String, Vec<ConsumptionReading>> {
    let mut groups: BTreeMap<String, Vec<ConsumptionReading>> = BTreeMap::new();
    for r in readings {
        groups.entry(r.region.clone()).or_default().push(r);
    }
    groups
}
