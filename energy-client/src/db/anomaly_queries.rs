use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{push_window, UPSERT_CHUNK_ROWS};
use crate::domain::{Anomaly, AnomalyFilter, AnomalyStats, ConfirmationStatus, NewAnomaly, RegionCount};
use crate::StoreError;

const ANOMALY_COLUMNS: &str =
    "id, ts, region, actual_value, predicted_value, anomaly_score, is_confirmed, created_at";

const TOP_REGIONS: i64 = 5;

/// Writes detector output keyed on (ts, region). Re-running detection over the
/// same window refreshes the values but keeps any human review state.
pub async fn upsert_anomalies(pool: &PgPool, anomalies: &[NewAnomaly]) -> Result<u64, StoreError> {
    if anomalies.is_empty() {
        return Ok(0);
    }

    let mut written = 0;
    let mut tx = pool.begin().await?;

    for chunk in anomalies.chunks(UPSERT_CHUNK_ROWS) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO anomalies (ts, region, actual_value, predicted_value, anomaly_score) ",
        );
        builder.push_values(chunk, |mut b, a| {
            b.push_bind(a.ts)
                .push_bind(a.region.clone())
                .push_bind(a.actual_value)
                .push_bind(a.predicted_value)
                .push_bind(a.anomaly_score);
        });
        builder.push(
            " ON CONFLICT (ts, region) DO UPDATE SET \
             actual_value = EXCLUDED.actual_value, \
             predicted_value = EXCLUDED.predicted_value, \
             anomaly_score = EXCLUDED.anomaly_score",
        );

        written += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

pub async fn list_anomalies(pool: &PgPool, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {ANOMALY_COLUMNS} FROM anomalies WHERE TRUE"
    ));
    push_window(&mut qb, filter.start, filter.end, filter.region.as_deref());
    if let Some(status) = filter.status {
        qb.push(" AND is_confirmed = ").push_bind(status.as_i16());
    }
    qb.push(" ORDER BY ts DESC, region LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let rows = qb.build_query_as::<Anomaly>().fetch_all(pool).await?;
    Ok(rows)
}

pub async fn set_confirmation(
    pool: &PgPool,
    id: i64,
    status: ConfirmationStatus,
) -> Result<Option<Anomaly>, StoreError> {
    let row = sqlx::query_as::<_, Anomaly>(&format!(
        "UPDATE anomalies SET is_confirmed = $2 WHERE id = $1 RETURNING {ANOMALY_COLUMNS}"
    ))
    .bind(id)
    .bind(status.as_i16())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[derive(sqlx::FromRow)]
struct CountsRow {
    total: i64,
    confirmed: i64,
    false_positives: i64,
    unconfirmed: i64,
    avg_score: Option<f64>,
}

pub async fn anomaly_stats(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
    region: Option<&str>,
) -> Result<AnomalyStats, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT
            COUNT(*)                                  AS total,
            COUNT(*) FILTER (WHERE is_confirmed = 1)  AS confirmed,
            COUNT(*) FILTER (WHERE is_confirmed = -1) AS false_positives,
            COUNT(*) FILTER (WHERE is_confirmed = 0)  AS unconfirmed,
            AVG(ABS(anomaly_score))                   AS avg_score
        FROM anomalies
        WHERE TRUE"#,
    );
    push_window(&mut qb, Some(start), Some(end), region);
    let counts = qb.build_query_as::<CountsRow>().fetch_one(pool).await?;

    let mut top_qb = QueryBuilder::<Postgres>::new(
        "SELECT region, COUNT(*) AS count FROM anomalies WHERE TRUE",
    );
    push_window(&mut top_qb, Some(start), Some(end), region);
    top_qb
        .push(" GROUP BY region ORDER BY count DESC, region LIMIT ")
        .push_bind(TOP_REGIONS);
    let top_regions = top_qb.build_query_as::<RegionCount>().fetch_all(pool).await?;

    Ok(AnomalyStats {
        total_anomalies: counts.total,
        confirmed_anomalies: counts.confirmed,
        false_positives: counts.false_positives,
        unconfirmed_anomalies: counts.unconfirmed,
        avg_anomaly_score: counts.avg_score,
        top_regions,
    })
}
