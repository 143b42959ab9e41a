pub mod db;
pub mod domain;

pub use domain::{MeterPoint, MeterPointError, Reading};
