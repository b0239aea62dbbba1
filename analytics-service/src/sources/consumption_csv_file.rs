use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use energy_client::domain::{timestamp::parse_timestamp, NewReading};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV file source for consumption readings.
///
/// Expected header columns (by name):
/// - timestamp (any format `parse_timestamp` accepts)
/// - region
/// - consumption_mwh
/// - temperature (optional)
/// - is_holiday (optional; true/false/1/0/yes/no)
///
/// A row that fails to parse is yielded as an error and the stream continues.
pub struct ConsumptionCsvFileSource {
    path: PathBuf,
}

impl ConsumptionCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional_f64(s: &str) -> Result<Option<f64>, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        trimmed.parse().map(Some).map_err(|e| format!("'{trimmed}': {e}"))
    }
}

pub(crate) fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" | "f" => Some(false),
        "1" | "true" | "yes" | "y" | "t" => Some(true),
        _ => None,
    }
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<NewReading, PipelineError> {
    let get = |name: &str| -> Option<&str> {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .and_then(|idx| record.get(idx))
    };
    let required = |name: &str| -> Result<&str, PipelineError> {
        get(name).ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = required("timestamp")?;
    let ts = parse_timestamp(ts_str)
        .ok_or_else(|| PipelineError::Source(format!("invalid timestamp '{ts_str}'")))?;

    let region = required("region")?.to_string();

    let mwh_str = required("consumption_mwh")?;
    let consumption_mwh: f64 = mwh_str
        .trim()
        .parse()
        .map_err(|e| PipelineError::Source(format!("invalid consumption_mwh '{mwh_str}': {e}")))?;

    let temperature = parse_optional_f64(get("temperature").unwrap_or(""))
        .map_err(|e| PipelineError::Source(format!("invalid temperature {e}")))?;

    let holiday_str = get("is_holiday").unwrap_or("");
    let is_holiday = parse_flag(holiday_str)
        .ok_or_else(|| PipelineError::Source(format!("invalid is_holiday '{holiday_str}'")))?;

    Ok(NewReading {
        ts,
        region,
        consumption_mwh,
        temperature,
        is_holiday,
    })
}

#[async_trait::async_trait]
impl Source<NewReading> for ConsumptionCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open CSV file: {e}")));
                    return;
                }
            };
            let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                let parsed = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_reading(&record, &headers));

                match parsed {
                    Ok(reading) => yield Ok(Envelope::new(reading)),
                    Err(e) => {
                        metrics::counter!("csv_parse_errors_total").increment(1);
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use time::macros::datetime;

    fn headers() -> StringRecord {
        StringRecord::from(vec!["timestamp", "region", "consumption_mwh", "temperature", "is_holiday"])
    }

    #[test]
    fn record_parses_all_columns() {
        let record = StringRecord::from(vec!["2024-03-01 13:00:00", "North", "42.5", "", "yes"]);
        let r = record_to_reading(&record, &headers()).unwrap();
        assert_eq!(r.ts, datetime!(2024-03-01 13:00:00 UTC));
        assert_eq!(r.region, "North");
        assert_eq!(r.consumption_mwh, 42.5);
        assert_eq!(r.temperature, None);
        assert!(r.is_holiday);
    }

    #[test]
    fn record_rejects_bad_values() {
        let bad_ts = StringRecord::from(vec!["yesterday", "north", "1", "", ""]);
        assert!(record_to_reading(&bad_ts, &headers()).is_err());

        let bad_flag = StringRecord::from(vec!["2024-03-01", "north", "1", "", "maybe"]);
        assert!(record_to_reading(&bad_flag, &headers()).is_err());
    }

    #[tokio::test]
    async fn bad_rows_are_yielded_as_errors_without_ending_the_stream() {
        let path = std::env::temp_dir().join(format!("consumption-{}.csv", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "timestamp,region,consumption_mwh,temperature,is_holiday").unwrap();
            writeln!(f, "2024-01-01T00:00:00Z,north,10.0,5.5,0").unwrap();
            writeln!(f, "2024-01-01T01:00:00Z,north,not-a-number,,0").unwrap();
            writeln!(f, "2024-01-01T02:00:00Z,south,12.0,,1").unwrap();
        }

        let items: Vec<_> = ConsumptionCsvFileSource::new(&path).stream().await.collect().await;
        let _ = std::fs::remove_file(&path);

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        let last = items[2].as_ref().unwrap();
        assert_eq!(last.payload.region, "south");
        assert!(last.payload.is_holiday);
    }
}
