use std::time::Duration;

use energy_client::{db::consumption_queries, domain::NewReading, StoreError};
use futures::StreamExt;
use sqlx::postgres::PgPool;

use crate::pipeline::{Envelope, LoadReport, PipelineError, Sink};

/// Writes readings in batches as upserts keyed on (ts, region).
pub struct ConsumptionSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ConsumptionSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<NewReading>]) -> Result<u64, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let readings: Vec<NewReading> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match consumption_queries::upsert_readings(&self.pool, &readings).await {
                Ok(written) => {
                    metrics::counter!("etl_records_loaded_total").increment(written);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("etl_batch_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    return Ok(written);
                }
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        batch = batch.len(),
                        "consumption sink flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, batch = batch.len(), "consumption sink flush failed, giving up");
                    metrics::counter!("etl_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }
}

fn retryable(err: &StoreError) -> bool {
    !matches!(err, StoreError::Conflict(_))
}

#[async_trait::async_trait]
impl Sink<NewReading> for ConsumptionSink {
    async fn run<S>(&self, mut input: S) -> Result<LoadReport, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<NewReading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut report = LoadReport::default();
        let mut buffer: Vec<Envelope<NewReading>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping record rejected upstream of consumption sink");
                    metrics::counter!("etl_records_skipped_total").increment(1);
                    report.skipped += 1;
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                report.loaded += self.flush_batch(&buffer).await?;
                report.batches += 1;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            report.loaded += self.flush_batch(&buffer).await?;
            report.batches += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/energy_test")
            .unwrap()
    }

    #[tokio::test]
    async fn upstream_errors_are_counted_and_nothing_is_written() {
        let sink = ConsumptionSink::new(lazy_pool(), 10, 0, Duration::from_millis(1));
        let input = stream::iter(vec![
            Err(PipelineError::Source("bad row".to_string())),
            Err(PipelineError::Transform("out of range".to_string())),
        ]);

        let report = sink.run(input).await.unwrap();
        assert_eq!(report, LoadReport { loaded: 0, skipped: 2, batches: 0 });
    }

    #[test]
    fn conflicts_are_not_retried() {
        assert!(!retryable(&StoreError::Conflict("dup".to_string())));
        assert!(retryable(&StoreError::Database(sqlx::Error::PoolTimedOut)));
    }
}
