//! Round trips against a live Postgres. Run with
//! `DATABASE_URL=postgres://... cargo test -p usage-client -- --ignored`.

use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use time::{macros::datetime, Duration, OffsetDateTime};
use usage_client::{db, domain::KWH, Reading};

const MPAN: &str = "1900000000001";

async fn pool() -> sqlx::PgPool {
    let uri = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&uri)
        .await
        .expect("connect to postgres");
    db::ensure_schema(&pool).await.expect("ensure schema");
    pool
}

fn reading(serial: &str, start: OffsetDateTime, kwh: rust_decimal::Decimal) -> Reading {
    Reading {
        mpan: MPAN.to_string(),
        meter_serial: serial.to_string(),
        consumption: kwh,
        interval_start: start,
        interval_end: start + Duration::minutes(30),
        unit: KWH.to_string(),
    }
}

async fn clear(pool: &sqlx::PgPool, serial: &str) {
    sqlx::query("DELETE FROM electricity_consumption WHERE mpan = $1 AND meter_serial = $2")
        .bind(MPAN)
        .bind(serial)
        .execute(pool)
        .await
        .expect("clear meter rows");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn upserting_the_same_batch_twice_is_idempotent() {
    let pool = pool().await;
    let serial = "IDEMPOTENT01";
    clear(&pool, serial).await;

    let start = datetime!(2026-02-01 00:00 UTC);
    let batch: Vec<Reading> = (0..48)
        .map(|i| reading(serial, start + Duration::minutes(30 * i), dec!(0.125)))
        .collect();

    assert_eq!(db::upsert_readings(&pool, &batch).await.unwrap(), 48);
    assert_eq!(db::upsert_readings(&pool, &batch).await.unwrap(), 48);
    assert_eq!(db::count_readings(&pool, MPAN, serial).await.unwrap(), 48);

    let stored = db::readings_for_period(&pool, MPAN, serial, start, start + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(stored, batch);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn later_upsert_overwrites_consumption_for_same_key() {
    let pool = pool().await;
    let serial = "OVERWRITE01";
    clear(&pool, serial).await;

    let start = datetime!(2026-02-01 00:00 UTC);
    db::upsert_readings(&pool, &[reading(serial, start, dec!(0.100))])
        .await
        .unwrap();
    db::upsert_readings(&pool, &[reading(serial, start, dec!(0.250))])
        .await
        .unwrap();

    let stored = db::readings_for_period(&pool, MPAN, serial, start, start + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].consumption, dec!(0.250));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn latest_interval_start_distinguishes_no_history() {
    let pool = pool().await;
    let serial = "LATEST01";
    clear(&pool, serial).await;

    assert_eq!(db::latest_interval_start(&pool, MPAN, serial).await.unwrap(), None);

    let first = datetime!(2026-02-01 00:00 UTC);
    let last = datetime!(2026-02-01 23:30 UTC);
    db::upsert_readings(
        &pool,
        &[reading(serial, last, dec!(0.3)), reading(serial, first, dec!(0.1))],
    )
    .await
    .unwrap();

    assert_eq!(
        db::latest_interval_start(&pool, MPAN, serial).await.unwrap(),
        Some(last)
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn failed_batch_writes_nothing() {
    let pool = pool().await;
    let serial = "ATOMIC01";
    clear(&pool, serial).await;

    let start = datetime!(2026-02-01 00:00 UTC);
    let mut batch: Vec<Reading> = (0..4)
        .map(|i| reading(serial, start + Duration::minutes(30 * i), dec!(0.2)))
        .collect();
    // Longer than the unit column allows.
    batch[3].unit = "kWh-per-half-hour".to_string();

    assert!(db::upsert_readings(&pool, &batch).await.is_err());
    assert_eq!(db::count_readings(&pool, MPAN, serial).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn failed_batch_leaves_existing_rows_untouched() {
    let pool = pool().await;
    let serial = "ATOMIC02";
    clear(&pool, serial).await;

    let start = datetime!(2026-02-01 00:00 UTC);
    db::upsert_readings(&pool, &[reading(serial, start, dec!(0.100))])
        .await
        .unwrap();

    let mut overlong = reading(serial, start + Duration::minutes(30), dec!(0.3));
    overlong.meter_serial = "X".repeat(51);
    let batch = vec![reading(serial, start, dec!(0.900)), overlong];

    assert!(db::upsert_readings(&pool, &batch).await.is_err());

    let stored = db::readings_for_period(&pool, MPAN, serial, start, start + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].consumption, dec!(0.100));
}
