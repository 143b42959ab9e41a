use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use time::OffsetDateTime;
use usage_client::{db, MeterPoint, Reading};

use crate::{config::PostgresConfig, pipeline::PipelineError};

/// Postgres SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Durable home of readings, keyed on `(mpan, meter_serial, interval_start)`.
#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert or overwrite every reading of `batch` atomically, returning
    /// the number of rows written.
    async fn upsert(&self, batch: &[Reading]) -> Result<u64, PipelineError>;

    /// Latest stored interval start for `meter`, `None` without history.
    async fn latest_interval_start(
        &self,
        meter: &MeterPoint,
    ) -> Result<Option<OffsetDateTime>, PipelineError>;
}

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &PostgresConfig) -> Result<Self, PipelineError> {
        let options = match &cfg.uri {
            Some(uri) => uri
                .parse::<PgConnectOptions>()
                .map_err(|e| PipelineError::Config(format!("invalid postgres uri: {e}")))?,
            None => PgConnectOptions::new()
                .host(&cfg.host)
                .port(cfg.port)
                .username(&cfg.user)
                .password(&cfg.password)
                .database(&cfg.database),
        };

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PipelineError::Persistence(format!("unable to connect to postgres: {e}")))?;

        tracing::info!("connected to postgres");
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        db::ensure_schema(&self.pool)
            .await
            .map_err(|e| PipelineError::Persistence(format!("failed to create schema: {e}")))
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn upsert(&self, batch: &[Reading]) -> Result<u64, PipelineError> {
        db::upsert_readings(&self.pool, batch)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))
    }

    async fn latest_interval_start(
        &self,
        meter: &MeterPoint,
    ) -> Result<Option<OffsetDateTime>, PipelineError> {
        match db::latest_interval_start(&self.pool, meter.mpan(), meter.serial()).await {
            Ok(latest) => Ok(latest),
            // A table that was never created holds no history.
            Err(e) if is_undefined_table(&e) => Ok(None),
            Err(e) => Err(PipelineError::Persistence(e.to_string())),
        }
    }
}

fn is_undefined_table(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}
