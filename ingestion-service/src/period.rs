use std::future::Future;

use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime, Time,
};

use crate::pipeline::PipelineError;

/// Start used when nothing better is known: no explicit start and no stored
/// history for the meter.
pub const EPOCH_ZERO: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

/// The `[start, end)` window fetched by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPeriod {
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl ResolvedPeriod {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidPeriod { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }
}

/// Period bounds as requested on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodRequest {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub infer: bool,
}

impl PeriodRequest {
    /// Resolve the effective window.
    ///
    /// An explicit start always wins. Otherwise, with `infer` set, the start
    /// is the latest stored interval start reported by `latest_stored`, or
    /// [`EPOCH_ZERO`] when the meter has no history. `latest_stored` is
    /// called at most once, and only when inferring. A missing end means
    /// `now`.
    pub async fn resolve<F, Fut>(
        &self,
        now: OffsetDateTime,
        latest_stored: F,
    ) -> Result<ResolvedPeriod, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<OffsetDateTime>, PipelineError>>,
    {
        let start = match self.start {
            Some(start) => start,
            None if self.infer => match latest_stored().await? {
                Some(latest) => {
                    tracing::info!(%latest, "inferred period start from latest stored reading");
                    latest
                }
                None => {
                    tracing::info!("no stored readings for meter, starting from the epoch");
                    EPOCH_ZERO
                }
            },
            None => EPOCH_ZERO,
        };
        let end = self.end.unwrap_or(now);

        ResolvedPeriod::new(start, end)
    }
}

/// Parse a command-line timestamp.
///
/// RFC 3339 values keep their offset. Naive `YYYY-MM-DD`,
/// `YYYY-MM-DDTHH:MM` and `YYYY-MM-DDTHH:MM:SS` (with `T` or a space) are
/// taken as UTC.
pub fn parse_cli_timestamp(input: &str) -> Result<OffsetDateTime, String> {
    let input = input.trim();
    if let Ok(ts) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(ts);
    }

    let normalized = input.replacen(' ', "T", 1);
    let seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let minutes = format_description!("[year]-[month]-[day]T[hour]:[minute]");
    let date_only = format_description!("[year]-[month]-[day]");

    PrimitiveDateTime::parse(&normalized, &seconds)
        .or_else(|_| PrimitiveDateTime::parse(&normalized, &minutes))
        .or_else(|_| Date::parse(&normalized, &date_only).map(|d| d.with_time(Time::MIDNIGHT)))
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| {
            format!("invalid timestamp '{input}': expected RFC 3339 or YYYY-MM-DD[THH:MM[:SS]]")
        })
}
