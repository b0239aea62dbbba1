use std::collections::HashMap;

use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{push_window, UPSERT_CHUNK_ROWS};
use crate::domain::{
    ConsumptionReading, ConsumptionStats, NewReading, ReadingFilter, ReadingPatch, RegionSummary,
};
use crate::StoreError;

const READING_COLUMNS: &str = "id, ts, region, consumption_mwh, temperature, is_holiday, created_at";
const DUPLICATE_READING: &str = "a reading for this timestamp and region already exists";

pub async fn insert_reading(pool: &PgPool, reading: &NewReading) -> Result<ConsumptionReading, StoreError> {
    sqlx::query_as::<_, ConsumptionReading>(&format!(
        r#"
        INSERT INTO energy_consumption (ts, region, consumption_mwh, temperature, is_holiday)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {READING_COLUMNS}
        "#
    ))
    .bind(reading.ts)
    .bind(&reading.region)
    .bind(reading.consumption_mwh)
    .bind(reading.temperature)
    .bind(reading.is_holiday)
    .fetch_one(pool)
    .await
    .map_err(|e| StoreError::from_write(e, DUPLICATE_READING))
}

pub async fn get_reading(pool: &PgPool, id: i64) -> Result<Option<ConsumptionReading>, StoreError> {
    let row = sqlx::query_as::<_, ConsumptionReading>(&format!(
        "SELECT {READING_COLUMNS} FROM energy_consumption WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Newest first, paginated.
pub async fn list_readings(pool: &PgPool, filter: &ReadingFilter) -> Result<Vec<ConsumptionReading>, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {READING_COLUMNS} FROM energy_consumption WHERE TRUE"
    ));
    push_window(&mut qb, filter.start, filter.end, filter.region.as_deref());
    qb.push(" ORDER BY ts DESC, region LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);

    let rows = qb.build_query_as::<ConsumptionReading>().fetch_all(pool).await?;
    Ok(rows)
}

pub async fn update_reading(
    pool: &PgPool,
    id: i64,
    patch: &ReadingPatch,
) -> Result<Option<ConsumptionReading>, StoreError> {
    let (set_temperature, temperature) = match patch.temperature {
        Some(t) => (true, t),
        None => (false, None),
    };

    sqlx::query_as::<_, ConsumptionReading>(&format!(
        r#"
        UPDATE energy_consumption
        SET ts              = COALESCE($2, ts),
            region          = COALESCE($3, region),
            consumption_mwh = COALESCE($4, consumption_mwh),
            temperature     = CASE WHEN $5 THEN $6 ELSE temperature END,
            is_holiday      = COALESCE($7, is_holiday)
        WHERE id = $1
        RETURNING {READING_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(patch.ts)
    .bind(&patch.region)
    .bind(patch.consumption_mwh)
    .bind(set_temperature)
    .bind(temperature)
    .bind(patch.is_holiday)
    .fetch_optional(pool)
    .await
    .map_err(|e| StoreError::from_write(e, DUPLICATE_READING))
}

pub async fn delete_reading(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM energy_consumption WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Keeps the last reading for each (ts, region) so a single multi-row upsert
/// never touches the same row twice.
pub fn dedupe_readings(readings: &[NewReading]) -> Vec<&NewReading> {
    let mut index: HashMap<(OffsetDateTime, &str), usize> = HashMap::with_capacity(readings.len());
    let mut out: Vec<&NewReading> = Vec::with_capacity(readings.len());

    for r in readings {
        match index.get(&(r.ts, r.region.as_str())) {
            Some(&pos) => out[pos] = r,
            None => {
                index.insert((r.ts, r.region.as_str()), out.len());
                out.push(r);
            }
        }
    }

    out
}

/// Batched upsert keyed on (ts, region). Large batches are written as several
/// statements in one transaction. Returns the number of rows written.
pub async fn upsert_readings(pool: &PgPool, readings: &[NewReading]) -> Result<u64, StoreError> {
    if readings.is_empty() {
        return Ok(0);
    }

    let rows = dedupe_readings(readings);
    let mut written = 0;
    let mut tx = pool.begin().await?;

    for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO energy_consumption (ts, region, consumption_mwh, temperature, is_holiday) ",
        );
        builder.push_values(chunk, |mut b, r| {
            b.push_bind(r.ts)
                .push_bind(r.region.clone())
                .push_bind(r.consumption_mwh)
                .push_bind(r.temperature)
                .push_bind(r.is_holiday);
        });
        builder.push(
            " ON CONFLICT (ts, region) DO UPDATE SET \
             consumption_mwh = EXCLUDED.consumption_mwh, \
             temperature = EXCLUDED.temperature, \
             is_holiday = EXCLUDED.is_holiday",
        );

        written += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

/// Time-ordered readings for the ML layer.
pub async fn load_window(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
    region: Option<&str>,
) -> Result<Vec<ConsumptionReading>, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {READING_COLUMNS} FROM energy_consumption WHERE TRUE"
    ));
    push_window(&mut qb, Some(start), Some(end), region);
    qb.push(" ORDER BY ts, region");

    let rows = qb.build_query_as::<ConsumptionReading>().fetch_all(pool).await?;
    Ok(rows)
}

pub async fn region_summary(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
    region: Option<&str>,
) -> Result<Vec<RegionSummary>, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT
            region,
            COUNT(*)             AS count,
            SUM(consumption_mwh) AS total_consumption,
            AVG(consumption_mwh) AS avg_consumption,
            MIN(consumption_mwh) AS min_consumption,
            MAX(consumption_mwh) AS max_consumption,
            AVG(temperature)     AS avg_temperature
        FROM energy_consumption
        WHERE TRUE"#,
    );
    push_window(&mut qb, Some(start), Some(end), region);
    qb.push(" GROUP BY region ORDER BY region");

    let rows = qb.build_query_as::<RegionSummary>().fetch_all(pool).await?;
    Ok(rows)
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total_consumption: f64,
    avg_consumption: f64,
    min_consumption: f64,
    max_consumption: f64,
    record_count: i64,
}

/// Totals over the filter. The region list ignores the region filter, so a
/// caller can see what else exists in the same date range.
pub async fn consumption_stats(
    pool: &PgPool,
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    region: Option<&str>,
) -> Result<ConsumptionStats, StoreError> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"
        SELECT
            COALESCE(SUM(consumption_mwh), 0) AS total_consumption,
            COALESCE(AVG(consumption_mwh), 0) AS avg_consumption,
            COALESCE(MIN(consumption_mwh), 0) AS min_consumption,
            COALESCE(MAX(consumption_mwh), 0) AS max_consumption,
            COUNT(*)                          AS record_count
        FROM energy_consumption
        WHERE TRUE"#,
    );
    push_window(&mut qb, start, end, region);
    let stats = qb.build_query_as::<StatsRow>().fetch_one(pool).await?;

    let mut regions_qb =
        QueryBuilder::<Postgres>::new("SELECT DISTINCT region FROM energy_consumption WHERE TRUE");
    push_window(&mut regions_qb, start, end, None);
    regions_qb.push(" ORDER BY region");
    let regions: Vec<String> = regions_qb
        .build_query_scalar::<String>()
        .fetch_all(pool)
        .await?;

    Ok(ConsumptionStats {
        total_consumption: stats.total_consumption,
        avg_consumption: stats.avg_consumption,
        min_consumption: stats.min_consumption,
        max_consumption: stats.max_consumption,
        record_count: stats.record_count,
        regions,
    })
}

pub async fn distinct_regions(pool: &PgPool) -> Result<Vec<String>, StoreError> {
    let regions = sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT region FROM energy_consumption ORDER BY region",
    )
    .fetch_all(pool)
    .await?;
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn reading(ts: OffsetDateTime, region: &str, mwh: f64) -> NewReading {
        NewReading {
            ts,
            region: region.to_string(),
            consumption_mwh: mwh,
            temperature: None,
            is_holiday: false,
        }
    }

    #[test]
    fn dedupe_keeps_last_reading_per_key_in_first_seen_order() {
        let t0 = datetime!(2024-01-01 00:00:00 UTC);
        let t1 = datetime!(2024-01-01 01:00:00 UTC);
        let batch = vec![
            reading(t0, "north", 1.0),
            reading(t1, "north", 2.0),
            reading(t0, "south", 3.0),
            reading(t0, "north", 4.0),
        ];

        let out = dedupe_readings(&batch);
        let values: Vec<f64> = out.iter().map(|r| r.consumption_mwh).collect();
        assert_eq!(values, vec![4.0, 2.0, 3.0]);
    }

    #[test]
    fn large_batches_split_under_bind_limit() {
        use crate::db::MAX_BIND_PARAMS;

        let base = datetime!(2024-01-01 00:00:00 UTC);
        let batch: Vec<NewReading> = (0..20_000)
            .map(|i| reading(base + time::Duration::hours(i), "north", 1.0))
            .collect();
        let rows = dedupe_readings(&batch);
        let chunks: Vec<_> = rows.chunks(UPSERT_CHUNK_ROWS).collect();
        assert_eq!(chunks.len(), 20);
        assert!(chunks.iter().all(|c| c.len() * 5 <= MAX_BIND_PARAMS));
    }
}
