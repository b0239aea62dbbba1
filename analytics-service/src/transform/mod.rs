use crate::pipeline::{Envelope, PipelineError, Transform};
use energy_client::domain::NewReading;
use time::macros::datetime;
use time::OffsetDateTime;

const MIN_TS: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);
const MAX_TS: OffsetDateTime = datetime!(2100-01-01 00:00:00 UTC);

pub const UNKNOWN_REGION: &str = "unknown";

/// Whether `ts` falls inside the accepted window [2000-01-01, 2100-01-01].
pub fn timestamp_in_range(ts: OffsetDateTime) -> bool {
    (MIN_TS..=MAX_TS).contains(&ts)
}

/// Canonical region key: trimmed and lowercased, `unknown` when blank.
pub fn normalize_region(region: &str) -> String {
    let trimmed = region.trim();
    if trimmed.is_empty() {
        UNKNOWN_REGION.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Pure validation of a `NewReading`.
///
/// Rules:
/// - consumption must be finite and within `[min, max]`.
/// - temperature, when present, must be finite.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_reading(
    env: Envelope<NewReading>,
    min: f64,
    max: f64,
) -> Result<Envelope<NewReading>, PipelineError> {
    let r = &env.payload;

    if !r.consumption_mwh.is_finite() {
        return Err(PipelineError::Transform("consumption_mwh must be finite".to_string()));
    }
    if r.consumption_mwh < min || r.consumption_mwh > max {
        return Err(PipelineError::Transform(format!(
            "consumption_mwh {} outside [{min}, {max}]",
            r.consumption_mwh
        )));
    }
    if r.temperature.is_some_and(|t| !t.is_finite()) {
        return Err(PipelineError::Transform("temperature must be finite".to_string()));
    }
    if !timestamp_in_range(r.ts) {
        return Err(PipelineError::Transform("timestamp out of allowed range".to_string()));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct RegionNormalization {
    pub override_region: Option<String>,
}

#[async_trait::async_trait]
impl Transform<NewReading, NewReading> for RegionNormalization {
    async fn apply(&self, mut input: Envelope<NewReading>) -> Result<Envelope<NewReading>, PipelineError> {
        input.payload.region = match &self.override_region {
            Some(region) => normalize_region(region),
            None => normalize_region(&input.payload.region),
        };
        Ok(input)
    }
}

#[derive(Clone)]
pub struct ReadingValidation {
    pub min_consumption: f64,
    pub max_consumption: f64,
}

impl Default for ReadingValidation {
    fn default() -> Self {
        Self {
            min_consumption: 0.0,
            max_consumption: 100_000.0,
        }
    }
}

#[async_trait::async_trait]
impl Transform<NewReading, NewReading> for ReadingValidation {
    async fn apply(&self, input: Envelope<NewReading>) -> Result<Envelope<NewReading>, PipelineError> {
        match validate_reading(input, self.min_consumption, self.max_consumption) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(consumption_mwh: f64, ts: OffsetDateTime) -> Envelope<NewReading> {
        Envelope::new(NewReading {
            ts,
            region: "  North ".to_string(),
            consumption_mwh,
            temperature: Some(12.0),
            is_holiday: false,
        })
    }

    #[test]
    fn reading_validation_accepts_valid_record() {
        let res = validate_reading(envelope(150.5, datetime!(2024-01-01 00:00:00 UTC)), 0.0, 1000.0);
        assert!(res.is_ok());
    }

    #[test]
    fn reading_validation_rejects_out_of_bounds_consumption() {
        let ts = datetime!(2024-01-01 00:00:00 UTC);
        assert!(matches!(
            validate_reading(envelope(-0.1, ts), 0.0, 1000.0),
            Err(PipelineError::Transform(_))
        ));
        assert!(matches!(
            validate_reading(envelope(1000.5, ts), 0.0, 1000.0),
            Err(PipelineError::Transform(_))
        ));
        assert!(matches!(
            validate_reading(envelope(f64::NAN, ts), 0.0, 1000.0),
            Err(PipelineError::Transform(_))
        ));
    }

    #[test]
    fn reading_validation_rejects_out_of_range_ts() {
        let res = validate_reading(envelope(1.0, datetime!(1800-01-01 00:00:00 UTC)), 0.0, 1000.0);
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }

    #[tokio::test]
    async fn region_normalization_trims_lowercases_and_overrides() {
        let ts = datetime!(2024-01-01 00:00:00 UTC);

        let out = RegionNormalization::default().apply(envelope(1.0, ts)).await.unwrap();
        assert_eq!(out.payload.region, "north");

        let forced = RegionNormalization {
            override_region: Some("West".to_string()),
        };
        let out = forced.apply(envelope(1.0, ts)).await.unwrap();
        assert_eq!(out.payload.region, "west");

        assert_eq!(normalize_region("   "), UNKNOWN_REGION);
    }
}
