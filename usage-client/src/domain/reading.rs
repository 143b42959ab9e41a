use rust_decimal::Decimal;
use time::OffsetDateTime;

/// Unit attached to every electricity consumption reading.
pub const KWH: &str = "kWh";

/// One half-hourly (or otherwise sized) consumption interval for one meter.
///
/// `(mpan, meter_serial, interval_start)` is the natural key of the
/// `electricity_consumption` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Reading {
    pub mpan: String,
    pub meter_serial: String,
    pub consumption: Decimal,
    pub interval_start: OffsetDateTime,
    pub interval_end: OffsetDateTime,
    pub unit: String,
}

impl Reading {
    pub fn key(&self) -> (&str, &str, OffsetDateTime) {
        (&self.mpan, &self.meter_serial, self.interval_start)
    }
}
