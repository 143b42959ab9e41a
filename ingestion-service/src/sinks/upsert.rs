use std::sync::Arc;

use futures::StreamExt;
use usage_client::Reading;

use crate::{
    pipeline::{Envelope, PipelineError, Sink},
    store::ReadingStore,
};

/// Writes readings to a [`ReadingStore`] in batches of `batch_size`.
///
/// Each batch is committed before more input is pulled, so an aborted run
/// keeps every batch flushed before the failure.
pub struct UpsertSink<St> {
    store: Arc<St>,
    batch_size: usize,
}

impl<St: ReadingStore> UpsertSink<St> {
    pub fn new(store: Arc<St>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    async fn flush_batch(&self, batch: &[Envelope<Reading>]) -> Result<u64, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let readings: Vec<Reading> = batch.iter().map(|env| env.payload.clone()).collect();
        match self.store.upsert(&readings).await {
            Ok(written) => {
                metrics::counter!("postgres_upserted_rows_total").increment(written);
                tracing::info!(rows = written, "upserted consumption batch");
                Ok(written)
            }
            Err(e) => {
                tracing::error!(error = %e, rows = readings.len(), "consumption batch upsert failed");
                metrics::counter!("postgres_sink_errors_total").increment(1);
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl<St: ReadingStore> Sink<Reading> for UpsertSink<St> {
    type Output = u64;

    async fn run<S>(&self, mut input: S) -> Result<u64, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut buffer: Vec<Envelope<Reading>> = Vec::with_capacity(self.batch_size);
        let mut written: u64 = 0;

        while let Some(item) = input.next().await {
            // Anything upstream fails the run; the pending buffer is dropped.
            buffer.push(item?);
            if buffer.len() >= self.batch_size {
                written += self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        written += self.flush_batch(&buffer).await?;
        Ok(written)
    }
}
