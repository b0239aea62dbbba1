use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use energy_client::domain::NewReading;
use serde::Serialize;
use sqlx::PgPool;
use time::{OffsetDateTime, Time};

use crate::{
    config::{EtlConfig, EtlSourceConfig},
    pipeline::{LoadReport, Pipeline, PipelineError, Source, Transform},
    sinks::ConsumptionSink,
    sources::{ConsumptionCsvFileSource, ConsumptionNdjsonFileSource, SimulatedMeterSource},
    transform::{ReadingValidation, RegionNormalization},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EtlSource {
    Csv(PathBuf),
    Ndjson(PathBuf),
    Simulated {
        start: OffsetDateTime,
        end: OffsetDateTime,
        num_meters: u32,
        seed: Option<u64>,
    },
}

impl EtlSource {
    /// Resolves the configured source. File sources load the whole file; the
    /// simulated source covers `window`.
    pub fn from_config(cfg: &EtlSourceConfig, window: (OffsetDateTime, OffsetDateTime)) -> Self {
        match cfg {
            EtlSourceConfig::Csv { path } => EtlSource::Csv(PathBuf::from(path)),
            EtlSourceConfig::Ndjson { path } => EtlSource::Ndjson(PathBuf::from(path)),
            EtlSourceConfig::Simulated { num_meters, seed } => EtlSource::Simulated {
                start: window.0,
                end: window.1,
                num_meters: *num_meters,
                seed: *seed,
            },
        }
    }

    fn file(&self) -> Option<&Path> {
        match self {
            EtlSource::Csv(p) | EtlSource::Ndjson(p) => Some(p),
            EtlSource::Simulated { .. } => None,
        }
    }
}

impl fmt::Display for EtlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtlSource::Csv(p) => write!(f, "csv:{}", p.display()),
            EtlSource::Ndjson(p) => write!(f, "ndjson:{}", p.display()),
            EtlSource::Simulated { start, end, .. } => write!(f, "simulated:{start}..{end}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EtlReport {
    pub source: String,
    /// blake3 of the input file, for file sources.
    pub digest: Option<String>,
    #[serde(flatten)]
    pub load: LoadReport,
    pub duration_ms: u64,
}

/// `[yesterday 00:00, today 00:00)` in UTC.
pub fn previous_day_window(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let end = now.replace_time(Time::MIDNIGHT);
    (end - time::Duration::DAY, end)
}

pub struct EtlJob {
    pool: PgPool,
    cfg: EtlConfig,
}

impl EtlJob {
    pub fn new(pool: PgPool, cfg: EtlConfig) -> Self {
        Self { pool, cfg }
    }

    fn transforms(&self) -> Vec<Arc<dyn Transform<NewReading, NewReading> + Send + Sync>> {
        vec![
            Arc::new(RegionNormalization {
                override_region: self.cfg.region_override.clone(),
            }),
            Arc::new(ReadingValidation {
                min_consumption: self.cfg.min_consumption,
                max_consumption: self.cfg.max_consumption,
            }),
        ]
    }

    fn sink(&self) -> ConsumptionSink {
        ConsumptionSink::new(
            self.pool.clone(),
            self.cfg.batch_size,
            self.cfg.max_retries,
            Duration::from_millis(self.cfg.retry_backoff_ms),
        )
    }

    async fn load<S>(&self, source: S) -> Result<LoadReport, PipelineError>
    where
        S: Source<NewReading> + Send + Sync + 'static,
    {
        let pipeline: Pipeline<_, NewReading, _> = Pipeline {
            source,
            transforms: self.transforms(),
            sink: self.sink(),
        };
        pipeline.run().await
    }

    pub async fn run(&self, source: EtlSource) -> Result<EtlReport, PipelineError> {
        let started = Instant::now();
        tracing::info!(source = %source, "etl job started");

        let digest = match source.file() {
            Some(path) => Some(file_digest(path.to_path_buf()).await?),
            None => None,
        };

        let load = match &source {
            EtlSource::Csv(path) => self.load(ConsumptionCsvFileSource::new(path)).await?,
            EtlSource::Ndjson(path) => self.load(ConsumptionNdjsonFileSource::new(path)).await?,
            EtlSource::Simulated {
                start,
                end,
                num_meters,
                seed,
            } => {
                if start >= end {
                    return Err(PipelineError::Source("simulated window start must precede end".to_string()));
                }
                self.load(SimulatedMeterSource::new(*start, *end, *num_meters, *seed))
                    .await?
            }
        };

        let report = EtlReport {
            source: source.to_string(),
            digest,
            load,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            source = %report.source,
            loaded = report.load.loaded,
            skipped = report.load.skipped,
            batches = report.load.batches,
            duration_ms = report.duration_ms,
            "etl job finished"
        );
        Ok(report)
    }
}

/// Hashes the input so repeated loads of the same file can be spotted in logs.
async fn file_digest(path: PathBuf) -> Result<String, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)
            .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", path.display())))?;
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut file, &mut hasher)
            .map_err(|e| PipelineError::Source(format!("failed to read {}: {e}", path.display())))?;
        Ok(hasher.finalize().to_hex().to_string())
    })
    .await
    .map_err(|e| PipelineError::Source(format!("digest task failed: {e}")))?
}
