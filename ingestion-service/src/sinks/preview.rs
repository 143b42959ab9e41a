use futures::StreamExt;
use time::format_description::well_known::Rfc3339;
use usage_client::Reading;

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Readings captured by a dry run.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    /// Readings shown, capped by the dry-run limit, in upstream order.
    pub readings: Vec<Reading>,
    /// Every reading the run normalized, shown or not.
    pub total: usize,
}

impl Preview {
    pub fn is_truncated(&self) -> bool {
        self.readings.len() < self.total
    }

    /// One display line per captured reading, numbered from 1.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.readings
            .iter()
            .enumerate()
            .map(|(i, reading)| format_reading(i + 1, reading))
    }

    pub fn summary(&self) -> String {
        if self.is_truncated() {
            format!(
                "Showing {} of {} records (use --limit to adjust)",
                self.readings.len(),
                self.total
            )
        } else {
            format!("Total records displayed: {}", self.readings.len())
        }
    }
}

fn format_reading(index: usize, reading: &Reading) -> String {
    let instant = |ts: time::OffsetDateTime| ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string());
    let consumption = format!("{:.3}", reading.consumption);

    format!(
        "[{index:4}] MPAN: {} | Meter: {} | Consumption: {consumption:>6} {} | Interval: {} → {}",
        reading.mpan,
        reading.meter_serial,
        reading.unit,
        instant(reading.interval_start),
        instant(reading.interval_end),
    )
}

/// Keeps the first `limit` readings (all of them when `None`) and never
/// writes anywhere. The input is still drained to the end so that a
/// malformed entry anywhere in the period fails the run.
pub struct PreviewSink {
    limit: Option<usize>,
}

impl PreviewSink {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }
}

#[async_trait::async_trait]
impl Sink<Reading> for PreviewSink {
    type Output = Preview;

    async fn run<S>(&self, mut input: S) -> Result<Preview, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut readings = Vec::new();
        let mut total = 0;

        while let Some(item) = input.next().await {
            let env = item?;
            total += 1;
            if self.limit.map_or(true, |limit| readings.len() < limit) {
                readings.push(env.payload);
            }
        }

        Ok(Preview { readings, total })
    }
}
