use std::collections::HashMap;

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::domain::Reading;

/// Six bound parameters per row; keeps each statement well under the
/// 65535 parameter limit of the Postgres wire protocol.
const UPSERT_CHUNK_ROWS: usize = 5_000;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS electricity_consumption (
        id BIGSERIAL PRIMARY KEY,
        mpan VARCHAR(13) NOT NULL,
        meter_serial VARCHAR(50) NOT NULL,
        consumption DECIMAL(10, 3) NOT NULL,
        interval_start TIMESTAMPTZ NOT NULL,
        interval_end TIMESTAMPTZ NOT NULL,
        unit VARCHAR(10) NOT NULL DEFAULT 'kWh',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT unique_reading UNIQUE (mpan, meter_serial, interval_start)
    );

    CREATE INDEX IF NOT EXISTS idx_mpan_interval
        ON electricity_consumption (mpan, interval_start DESC);
"#;

/// Create the `electricity_consumption` table and its indexes if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(CREATE_TABLE_SQL).execute(pool).await?;
    Ok(())
}

/// Insert or update a batch of readings keyed on
/// `(mpan, meter_serial, interval_start)`.
///
/// The whole batch runs in one transaction: either every row reflects the
/// incoming values or nothing is written. Returns the number of rows
/// inserted or updated.
pub async fn upsert_readings(pool: &PgPool, readings: &[Reading]) -> Result<u64> {
    if readings.is_empty() {
        return Ok(0);
    }

    let rows = collapse_duplicate_keys(readings);
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO electricity_consumption (mpan, meter_serial, consumption, interval_start, interval_end, unit) ",
        );

        builder.push_values(chunk, |mut b, r| {
            b.push_bind(&r.mpan)
                .push_bind(&r.meter_serial)
                .push_bind(r.consumption)
                .push_bind(r.interval_start)
                .push_bind(r.interval_end)
                .push_bind(&r.unit);
        });

        builder.push(
            " ON CONFLICT (mpan, meter_serial, interval_start) DO UPDATE SET \
             consumption = EXCLUDED.consumption, \
             interval_end = EXCLUDED.interval_end, \
             unit = EXCLUDED.unit",
        );

        written += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

/// Latest stored `interval_start` for a meter, or `None` when the meter has
/// no history.
pub async fn latest_interval_start(
    pool: &PgPool,
    mpan: &str,
    meter_serial: &str,
) -> Result<Option<OffsetDateTime>> {
    let latest = sqlx::query_scalar::<_, Option<OffsetDateTime>>(
        r#"
        SELECT MAX(interval_start)
        FROM electricity_consumption
        WHERE mpan = $1
          AND meter_serial = $2
        "#,
    )
    .bind(mpan)
    .bind(meter_serial)
    .fetch_one(pool)
    .await?;

    Ok(latest)
}

/// Fetch the time-ordered readings of a meter within `[start, end)`.
pub async fn readings_for_period(
    pool: &PgPool,
    mpan: &str,
    meter_serial: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<Reading>> {
    let rows = sqlx::query_as::<_, Reading>(
        r#"
        SELECT
            mpan,
            meter_serial,
            consumption,
            interval_start,
            interval_end,
            unit
        FROM electricity_consumption
        WHERE mpan = $1
          AND meter_serial = $2
          AND interval_start >= $3
          AND interval_start <  $4
        ORDER BY interval_start
        "#,
    )
    .bind(mpan)
    .bind(meter_serial)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn count_readings(pool: &PgPool, mpan: &str, meter_serial: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM electricity_consumption WHERE mpan = $1 AND meter_serial = $2",
    )
    .bind(mpan)
    .bind(meter_serial)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Postgres rejects an `ON CONFLICT DO UPDATE` that touches the same row
/// twice, so repeated keys inside one batch are collapsed first. The last
/// occurrence wins and keeps the position of the first.
fn collapse_duplicate_keys(readings: &[Reading]) -> Vec<&Reading> {
    let mut positions: HashMap<(&str, &str, OffsetDateTime), usize> = HashMap::new();
    let mut rows: Vec<&Reading> = Vec::with_capacity(readings.len());

    for reading in readings {
        match positions.get(&reading.key()) {
            Some(&idx) => rows[idx] = reading,
            None => {
                positions.insert(reading.key(), rows.len());
                rows.push(reading);
            }
        }
    }

    rows
}
