use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use usage_client::{domain::KWH, MeterPoint, Reading};

use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    sources::RawConsumption,
};

/// Largest value a `DECIMAL(10, 3)` column holds.
const MAX_CONSUMPTION: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 3);

/// Turn one raw API entry into a `Reading` for `meter`.
///
/// Rules:
/// - consumption must be present, numeric, finite and non-negative; it is
///   rounded to 3 decimal places.
/// - interval bounds must be RFC 3339 with an explicit offset.
/// - interval_start must be strictly before interval_end.
pub fn normalize(raw: &RawConsumption, meter: &MeterPoint) -> Result<Reading, PipelineError> {
    let consumption = parse_consumption(raw.consumption.as_ref())?;
    let interval_start = parse_instant("interval_start", raw.interval_start.as_ref())?;
    let interval_end = parse_instant("interval_end", raw.interval_end.as_ref())?;

    if interval_start >= interval_end {
        return Err(PipelineError::MalformedEntry(format!(
            "interval_start {interval_start} is not before interval_end {interval_end}"
        )));
    }

    Ok(Reading {
        mpan: meter.mpan().to_string(),
        meter_serial: meter.serial().to_string(),
        consumption,
        interval_start,
        interval_end,
        unit: KWH.to_string(),
    })
}

fn parse_consumption(value: Option<&Value>) -> Result<Decimal, PipelineError> {
    let text = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(PipelineError::MalformedEntry(format!(
                "consumption is not numeric: {other}"
            )))
        }
        None => return Err(PipelineError::MalformedEntry("missing consumption".to_string())),
    };

    let exact = parse_decimal(&text)
        .map_err(|e| PipelineError::MalformedEntry(format!("invalid consumption '{text}': {e}")))?;

    // Checked before rounding so that tiny negatives are not absorbed into zero.
    if exact.is_sign_negative() && !exact.is_zero() {
        return Err(PipelineError::MalformedEntry(format!(
            "consumption must be non-negative, got {text}"
        )));
    }

    let kwh = exact
        .abs()
        .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);
    if kwh > MAX_CONSUMPTION {
        return Err(PipelineError::MalformedEntry(format!(
            "consumption {kwh} exceeds {MAX_CONSUMPTION}"
        )));
    }

    Ok(kwh)
}

/// Plain or scientific notation. Exponents beyond the 28 digits of scale a
/// `Decimal` carries collapse to the smallest representable magnitude, which
/// keeps the sign and rounds to zero.
fn parse_decimal(text: &str) -> Result<Decimal, rust_decimal::Error> {
    if let Ok(value) = Decimal::from_str(text) {
        return Ok(value);
    }

    if let Some((mantissa, exponent)) = text.split_once(['e', 'E']) {
        if let (Ok(mantissa), Ok(exponent)) = (Decimal::from_str(mantissa), exponent.parse::<i64>()) {
            if exponent < -28 && mantissa.abs() < Decimal::TEN {
                if mantissa.is_zero() {
                    return Ok(Decimal::ZERO);
                }
                let mut tiny = Decimal::new(1, 28);
                tiny.set_sign_negative(mantissa.is_sign_negative());
                return Ok(tiny);
            }
        }
    }

    Decimal::from_scientific(text)
}

fn parse_instant(field: &str, value: Option<&Value>) -> Result<OffsetDateTime, PipelineError> {
    let text = match value {
        Some(Value::String(s)) => s.trim(),
        Some(other) => {
            return Err(PipelineError::MalformedEntry(format!(
                "{field} is not a timestamp string: {other}"
            )))
        }
        None => return Err(PipelineError::MalformedEntry(format!("missing {field}"))),
    };

    // Rfc3339 requires an offset, so naive timestamps are rejected here.
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|e| PipelineError::MalformedEntry(format!("invalid {field} '{text}': {e}")))
}

#[derive(Clone)]
pub struct Normalizer {
    meter: MeterPoint,
}

impl Normalizer {
    pub fn new(meter: MeterPoint) -> Self {
        Self { meter }
    }
}

#[async_trait::async_trait]
impl Transform<RawConsumption, Reading> for Normalizer {
    async fn apply(
        &self,
        input: Envelope<RawConsumption>,
    ) -> Result<Envelope<Reading>, PipelineError> {
        let reading = match normalize(&input.payload, &self.meter) {
            Ok(reading) => reading,
            Err(e) => {
                metrics::counter!("normalize_rejected_total").increment(1);
                tracing::error!(error = %e, entry = ?input.payload, "rejecting consumption entry");
                return Err(e);
            }
        };

        Ok(input.map(|_| reading))
    }
}
