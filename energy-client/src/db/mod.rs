pub mod anomaly_queries;
pub mod consumption_queries;
pub mod user_queries;

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::StoreError;

/// Postgres caps a statement at 65535 bind parameters.
pub(crate) const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per multi-row `INSERT`; batch upserts are split into statements of this size.
pub(crate) const UPSERT_CHUNK_ROWS: usize = 1000;

// Both batch upserts bind five columns per row.
const _: () = assert!(UPSERT_CHUNK_ROWS * 5 <= MAX_BIND_PARAMS);

pub async fn connect(uri: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(uri)
        .await?;
    Ok(pool)
}

/// Applies the embedded migrations under `energy-client/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Appends `AND ts >= .. AND ts <= .. AND region = ..` for the filters that are set.
/// The builder must already contain a `WHERE` clause.
pub(crate) fn push_window(
    qb: &mut QueryBuilder<'_, Postgres>,
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    region: Option<&str>,
) {
    if let Some(start) = start {
        qb.push(" AND ts >= ").push_bind(start);
    }
    if let Some(end) = end {
        qb.push(" AND ts <= ").push_bind(end);
    }
    if let Some(region) = region {
        qb.push(" AND region = ").push_bind(region.to_string());
    }
}
