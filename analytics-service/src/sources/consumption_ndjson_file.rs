use std::path::PathBuf;

use energy_client::domain::NewReading;
use futures::StreamExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use tokio_stream::wrappers::LinesStream;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Newline-delimited JSON source. Each non-blank line is one reading with the
/// same fields as the `POST /api/consumption` body.
pub struct ConsumptionNdjsonFileSource {
    path: PathBuf,
}

impl ConsumptionNdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line: &str) -> Result<NewReading, PipelineError> {
    serde_json::from_str(line).map_err(|e| {
        metrics::counter!("ndjson_parse_errors_total").increment(1);
        PipelineError::Source(format!("failed to parse json line: {e}"))
    })
}

#[async_trait::async_trait]
impl Source<NewReading> for ConsumptionNdjsonFileSource {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) => {
                let err = PipelineError::Source(format!("failed to open ndjson file: {e}"));
                return Box::pin(futures::stream::once(async move { Err(err) }));
            }
        };

        let lines = LinesStream::new(BufReader::new(file).lines());
        let s = lines
            .filter(|line| {
                let keep = !matches!(line, Ok(l) if l.trim().is_empty());
                async move { keep }
            })
            .map(|line| match line {
                Ok(l) => parse_line(&l).map(Envelope::new),
                Err(e) => Err(PipelineError::Source(format!("failed to read line: {e}"))),
            });

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use time::macros::datetime;

    #[test]
    fn line_accepts_naive_timestamp() {
        let r = parse_line(r#"{"timestamp":"2024-02-01 05:00:00","region":"east","consumption_mwh":7.25}"#)
            .unwrap();
        assert_eq!(r.ts, datetime!(2024-02-01 05:00:00 UTC));
        assert_eq!(r.temperature, None);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_bad_lines_reported() {
        let path = std::env::temp_dir().join(format!("consumption-{}.ndjson", std::process::id()));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, r#"{{"timestamp":"2024-01-01T00:00:00Z","region":"north","consumption_mwh":1.0}}"#).unwrap();
            writeln!(f).unwrap();
            writeln!(f, "{{not json").unwrap();
        }

        let items: Vec<_> = ConsumptionNdjsonFileSource::new(&path).stream().await.collect().await;
        let _ = std::fs::remove_file(&path);

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn missing_file_yields_single_error() {
        let items: Vec<_> = ConsumptionNdjsonFileSource::new("/nonexistent/readings.ndjson")
            .stream()
            .await
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
