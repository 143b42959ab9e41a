use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use octo_usage_ingest::{
    config::AppConfig,
    observability,
    period::{parse_cli_timestamp, PeriodRequest},
    sources::OctopusClient,
    store::PgReadingStore,
    Ingestion, RunMode, RunOutcome, RunRequest,
};
use time::OffsetDateTime;

/// Fetch electricity consumption from the Octopus Energy API and store it in
/// PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "octo-usage", version)]
struct Cli {
    /// Start of the period, inclusive (RFC 3339, or YYYY-MM-DD[THH:MM[:SS]] as UTC)
    #[arg(long, value_parser = parse_cli_timestamp)]
    period_start: Option<OffsetDateTime>,
    /// End of the period, exclusive (defaults to now)
    #[arg(long, value_parser = parse_cli_timestamp)]
    period_end: Option<OffsetDateTime>,
    /// Infer the period start from the latest stored reading (epoch when none)
    #[arg(long)]
    infer: bool,
    /// Print readings without storing them (no database connection unless --infer needs one)
    #[arg(long)]
    dry_run: bool,
    /// Maximum number of readings to display in dry-run mode
    #[arg(long, requires = "dry_run")]
    limit: Option<usize>,
    /// Path to the TOML config file (overrides OCTO_USAGE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn run_request(&self) -> RunRequest {
        RunRequest {
            period: PeriodRequest {
                start: self.period_start,
                end: self.period_end,
                infer: self.infer,
            },
            mode: if self.dry_run {
                RunMode::DryRun { limit: self.limit }
            } else {
                RunMode::Live
            },
        }
    }

    fn needs_database(&self) -> bool {
        !self.dry_run || (self.infer && self.period_start.is_none())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref())?;
    cfg.validate()?;
    let meter = cfg.meter_point()?;

    let api = Arc::new(OctopusClient::new(&cfg.octopus)?);
    let mut ingestion = Ingestion::<OctopusClient, PgReadingStore>::new(api, meter)
        .with_batch_size(cfg.sink.batch_size);

    if cli.needs_database() {
        let store = PgReadingStore::connect(&cfg.postgres).await?;
        if !cli.dry_run && cfg.postgres.ensure_schema {
            store.ensure_schema().await?;
        }
        ingestion = ingestion.with_store(Arc::new(store));
    }

    let outcome = ingestion
        .run(&cli.run_request(), OffsetDateTime::now_utc())
        .await
        .map_err(|e| {
            tracing::error!(kind = e.kind(), retryable = e.is_retryable(), error = %e, "ingestion run failed");
            e
        })?;

    match outcome {
        RunOutcome::Stored {
            period,
            rows_written,
        } => {
            if rows_written == 0 {
                tracing::warn!("no consumption data received from the Octopus API");
            }
            println!(
                "{rows_written} rows written for {} ({} to {})",
                ingestion.meter(),
                period.start(),
                period.end()
            );
        }
        RunOutcome::Previewed { preview, .. } => {
            if preview.total == 0 {
                tracing::warn!("no consumption data received from the Octopus API");
                return Ok(());
            }
            for line in preview.lines() {
                println!("{line}");
            }
            println!("{}", preview.summary());
        }
    }

    Ok(())
}
