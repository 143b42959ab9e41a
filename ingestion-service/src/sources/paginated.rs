use std::sync::Arc;

use async_stream::try_stream;
use usage_client::MeterPoint;

use crate::{
    period::ResolvedPeriod,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

/// One consumption entry exactly as the API returned it.
///
/// Fields stay untyped so that a bad value surfaces as a malformed entry
/// from the normalizer instead of failing the whole page.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct RawConsumption {
    pub consumption: Option<serde_json::Value>,
    pub interval_start: Option<serde_json::Value>,
    pub interval_end: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ConsumptionPage {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<RawConsumption>,
}

impl ConsumptionPage {
    /// Next-page cursor, treating a blank marker as absent.
    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.next
            .as_deref()
            .map(str::trim)
            .filter(|next| !next.is_empty())
            .map(|next| PageCursor::Next(next.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First page of a period, built from the period bounds.
    First(ResolvedPeriod),
    /// Follow-up page, addressed by the absolute URL the previous page gave.
    Next(String),
}

/// Capability to fetch one page of consumption readings for a meter.
#[async_trait::async_trait]
pub trait ConsumptionApi: Send + Sync {
    async fn fetch_page(
        &self,
        meter: &MeterPoint,
        cursor: &PageCursor,
    ) -> Result<ConsumptionPage, PipelineError>;
}

/// Walks every page of a period and yields its entries in upstream order.
///
/// Each call to [`Source::stream`] starts again from the first page. A page
/// is only requested once every entry of the previous one has been pulled.
pub struct PaginatedConsumptionSource<A> {
    api: Arc<A>,
    meter: MeterPoint,
    period: ResolvedPeriod,
}

impl<A> PaginatedConsumptionSource<A> {
    pub fn new(api: Arc<A>, meter: MeterPoint, period: ResolvedPeriod) -> Self {
        Self { api, meter, period }
    }
}

#[async_trait::async_trait]
impl<A> Source<RawConsumption> for PaginatedConsumptionSource<A>
where
    A: ConsumptionApi + 'static,
{
    async fn stream(&self) -> EnvelopeStream<RawConsumption> {
        let api = Arc::clone(&self.api);
        let meter = self.meter.clone();
        let period = self.period;

        let s = try_stream! {
            let mut cursor = Some(PageCursor::First(period));
            let mut page_number: u32 = 0;

            while let Some(current) = cursor.take() {
                page_number += 1;
                let page = api.fetch_page(&meter, &current).await?;

                metrics::counter!("octopus_pages_fetched_total").increment(1);
                metrics::counter!("octopus_entries_fetched_total").increment(page.results.len() as u64);
                tracing::debug!(
                    page = page_number,
                    entries = page.results.len(),
                    total = ?page.count,
                    has_next = page.next.is_some(),
                    "fetched consumption page"
                );

                cursor = page.next_cursor();
                if cursor.as_ref() == Some(&current) {
                    Err::<(), _>(PipelineError::Upstream {
                        status: None,
                        transient: false,
                        message: format!("pagination did not advance past page {page_number}"),
                    })?;
                }

                for entry in page.results {
                    yield Envelope::new(entry);
                }
            }
        };

        Box::pin(s)
    }
}
