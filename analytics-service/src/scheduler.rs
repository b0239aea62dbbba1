//! Periodic batch jobs: the daily ETL load and the anomaly refresh.
//!
//! Each job runs in its own loop, so a slow run delays the next tick of that
//! job instead of overlapping with it. Failed runs are retried with a fixed
//! delay; every finished run is counted in `scheduler_job_runs_total`.

use std::{fmt, future::Future, time::Duration};

use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AppConfig, EtlSourceConfig, SchedulerConfig},
    etl::{previous_day_window, EtlJob, EtlSource},
    ml::{
        service::{DetectAnomaliesRequest, DetectAnomaliesResponse, ModelOverrides},
        MlError, MlService,
    },
};

pub struct Scheduler {
    etl: EtlJob,
    source: EtlSourceConfig,
    ml: MlService,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(pool: PgPool, cfg: &AppConfig) -> Self {
        Self {
            source: cfg.etl.source.clone(),
            etl: EtlJob::new(pool.clone(), cfg.etl.clone()),
            ml: MlService::new(pool, cfg.ml.clone()),
            cfg: cfg.scheduler.clone(),
        }
    }

    /// Runs both job loops until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            etl_interval_secs = self.cfg.etl_interval_secs,
            refresh_interval_secs = self.cfg.refresh_interval_secs,
            "scheduler started"
        );
        tokio::join!(self.etl_loop(&shutdown), self.refresh_loop(&shutdown));
        tracing::info!("scheduler stopped");
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.cfg.retry_delay_secs)
    }

    async fn etl_loop(&self, shutdown: &CancellationToken) {
        let period = Duration::from_secs(self.cfg.etl_interval_secs.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let window = previous_day_window(OffsetDateTime::now_utc());
            let source = EtlSource::from_config(&self.source, window);
            let _ = with_retries("etl", self.cfg.retries, self.retry_delay(), shutdown, || {
                self.etl.run(source.clone())
            })
            .await;
        }
    }

    async fn refresh_loop(&self, shutdown: &CancellationToken) {
        let period = Duration::from_secs(self.cfg.refresh_interval_secs.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let now = OffsetDateTime::now_utc();
            let res = with_retries("anomaly_refresh", self.cfg.retries, self.retry_delay(), shutdown, || {
                refresh_anomalies(&self.ml, self.cfg.lookback_days, None, now)
            })
            .await;
            if let Ok(resp) = res {
                tracing::info!(
                    anomalies = resp.anomalies.iter().filter(|p| p.is_anomaly).count(),
                    persisted = resp.persisted,
                    skipped_regions = resp.skipped_regions.len(),
                    "anomaly refresh finished"
                );
            }
        }
    }
}

/// Re-scores the trailing `lookback_days` of readings and stores the anomalies.
/// A window with nothing to score is not an error.
pub async fn refresh_anomalies(
    ml: &MlService,
    lookback_days: i64,
    region: Option<String>,
    now: OffsetDateTime,
) -> Result<DetectAnomaliesResponse, MlError> {
    let req = DetectAnomaliesRequest {
        start_date: now - time::Duration::days(lookback_days.max(1)),
        end_date: now,
        region,
        method: Default::default(),
        model_type: Default::default(),
        model_params: ModelOverrides::default(),
    };
    accept_empty_window(ml.detect_anomalies(req).await, lookback_days)
}

/// Empty or too-short windows stay that way on retry, so they count as a
/// successful run with no output.
fn accept_empty_window(
    res: Result<DetectAnomaliesResponse, MlError>,
    lookback_days: i64,
) -> Result<DetectAnomaliesResponse, MlError> {
    match res {
        Err(MlError::NoData) => {
            tracing::info!(lookback_days, "no readings in refresh window");
            Ok(DetectAnomaliesResponse::default())
        }
        Err(MlError::InsufficientData { required, actual }) => {
            tracing::info!(lookback_days, required, actual, "too few readings in refresh window");
            Ok(DetectAnomaliesResponse::default())
        }
        other => other,
    }
}

/// Runs `job` up to `retries + 1` times, sleeping `delay` between attempts.
/// Gives up early once `shutdown` is cancelled.
pub async fn with_retries<T, E, F, Fut>(
    job: &'static str,
    retries: u32,
    delay: Duration,
    shutdown: &CancellationToken,
    mut run: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match run().await {
            Ok(v) => {
                metrics::counter!("scheduler_job_runs_total", "job" => job, "outcome" => "success").increment(1);
                return Ok(v);
            }
            Err(e) if attempt < retries && !shutdown.is_cancelled() => {
                attempt += 1;
                tracing::warn!(job, attempt, error = %e, "job failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => {
                        metrics::counter!("scheduler_job_runs_total", "job" => job, "outcome" => "failure").increment(1);
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                metrics::counter!("scheduler_job_runs_total", "job" => job, "outcome" => "failure").increment(1);
                tracing::error!(job, attempts = attempt + 1, error = %e, "job failed");
                return Err(e);
            }
        }
    }
}
