use analytics_service::{
    config::AppConfig,
    etl::{EtlJob, EtlSource},
    observability,
};
use anyhow::{bail, Result};
use energy_client::{db, domain::timestamp::parse_timestamp};
use std::{env, path::PathBuf};

const USAGE: &str = "usage: run_etl csv <file> | ndjson <file> | simulated <start> <end> [num_meters] [seed]";

fn parse_source(args: &[String]) -> Result<EtlSource> {
    let Some(kind) = args.first() else {
        bail!(USAGE);
    };
    match (kind.as_str(), &args[1..]) {
        ("csv", [path]) => Ok(EtlSource::Csv(PathBuf::from(path))),
        ("ndjson", [path]) => Ok(EtlSource::Ndjson(PathBuf::from(path))),
        ("simulated", [start, end, rest @ ..]) if rest.len() <= 2 => {
            let start = parse_timestamp(start).ok_or_else(|| anyhow::anyhow!("invalid start timestamp: {start}"))?;
            let end = parse_timestamp(end).ok_or_else(|| anyhow::anyhow!("invalid end timestamp: {end}"))?;
            let num_meters = match rest.first() {
                Some(n) => n.parse()?,
                None => 100,
            };
            let seed = rest.get(1).map(|s| s.parse()).transpose()?;
            Ok(EtlSource::Simulated {
                start,
                end,
                num_meters,
                seed,
            })
        }
        _ => bail!(USAGE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let source = parse_source(&args)?;

    // ANALYTICS_CONFIG can point at a batch-specific file.
    let cfg = AppConfig::load()?;
    let pool = db::connect(&cfg.database.uri, cfg.database.max_connections).await?;
    if cfg.database.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let report = EtlJob::new(pool, cfg.etl).run(source).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
