pub mod meter;
pub mod reading;

pub use meter::{MeterPoint, MeterPointError};
pub use reading::{Reading, KWH};
