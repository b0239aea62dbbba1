use analytics_service::{config::AppConfig, ml::MlService, observability, scheduler::refresh_anomalies};
use anyhow::{bail, Result};
use energy_client::db;
use std::env;
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() > 2 {
        bail!("usage: refresh_anomalies [lookback_days] [region]");
    }

    let cfg = AppConfig::load()?;
    let lookback_days = match args.first() {
        Some(days) => days.parse()?,
        None => cfg.scheduler.lookback_days,
    };
    let region = args.get(1).map(|r| analytics_service::transform::normalize_region(r));

    let pool = db::connect(&cfg.database.uri, cfg.database.max_connections).await?;
    let ml = MlService::new(pool, cfg.ml);

    let resp = refresh_anomalies(&ml, lookback_days, region, OffsetDateTime::now_utc()).await?;
    tracing::info!(
        anomalies = resp.anomalies.iter().filter(|p| p.is_anomaly).count(),
        persisted = resp.persisted,
        "anomaly refresh finished"
    );
    println!("{}", serde_json::to_string_pretty(&resp)?);

    Ok(())
}
