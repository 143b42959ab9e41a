use std::sync::Arc;

use time::OffsetDateTime;
use usage_client::{MeterPoint, Reading};

use crate::{
    period::{PeriodRequest, ResolvedPeriod},
    pipeline::{Pipeline, PipelineError, Transform},
    sinks::{Preview, PreviewSink, UpsertSink},
    sources::{ConsumptionApi, PaginatedConsumptionSource, RawConsumption},
    store::ReadingStore,
    transform::Normalizer,
};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Upsert every reading of the period.
    Live,
    /// Show up to `limit` readings without touching the store.
    DryRun { limit: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub period: PeriodRequest,
    pub mode: RunMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Stored {
        period: ResolvedPeriod,
        rows_written: u64,
    },
    Previewed {
        period: ResolvedPeriod,
        preview: Preview,
    },
}

/// One meter's ingestion: resolve the period, stream the API's pages
/// through the normalizer, then upsert (live) or preview (dry run).
///
/// The store is optional so that a dry run needs no database at all; it is
/// only consulted there when the period start has to be inferred.
pub struct Ingestion<A, St> {
    api: Arc<A>,
    store: Option<Arc<St>>,
    meter: MeterPoint,
    batch_size: usize,
}

impl<A, St> Ingestion<A, St>
where
    A: ConsumptionApi + 'static,
    St: ReadingStore + 'static,
{
    pub fn new(api: Arc<A>, meter: MeterPoint) -> Self {
        Self {
            api,
            store: None,
            meter,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_store(mut self, store: Arc<St>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn meter(&self) -> &MeterPoint {
        &self.meter
    }

    pub async fn run(
        &self,
        request: &RunRequest,
        now: OffsetDateTime,
    ) -> Result<RunOutcome, PipelineError> {
        let period = request.period.resolve(now, || self.latest_stored()).await?;
        tracing::info!(
            meter = %self.meter,
            start = %period.start(),
            end = %period.end(),
            mode = ?request.mode,
            "resolved consumption period"
        );

        let source = PaginatedConsumptionSource::new(Arc::clone(&self.api), self.meter.clone(), period);
        let normalizer: Arc<dyn Transform<RawConsumption, Reading> + Send + Sync> =
            Arc::new(Normalizer::new(self.meter.clone()));

        match request.mode {
            RunMode::DryRun { limit } => {
                let pipeline = Pipeline {
                    source,
                    transform: normalizer,
                    sink: PreviewSink::new(limit),
                };
                let preview = pipeline.run().await?;
                tracing::info!(total = preview.total, shown = preview.readings.len(), "dry run complete");
                Ok(RunOutcome::Previewed { period, preview })
            }
            RunMode::Live => {
                let store = self.store.as_ref().ok_or_else(|| {
                    PipelineError::Config("a live run requires a database connection".to_string())
                })?;
                let pipeline = Pipeline {
                    source,
                    transform: normalizer,
                    sink: UpsertSink::new(Arc::clone(store), self.batch_size),
                };
                let rows_written = pipeline.run().await?;
                tracing::info!(rows = rows_written, "live run complete");
                Ok(RunOutcome::Stored {
                    period,
                    rows_written,
                })
            }
        }
    }

    async fn latest_stored(&self) -> Result<Option<OffsetDateTime>, PipelineError> {
        match &self.store {
            Some(store) => store.latest_interval_start(&self.meter).await,
            None => Err(PipelineError::Config(
                "inferring the period start requires a database connection".to_string(),
            )),
        }
    }
}
