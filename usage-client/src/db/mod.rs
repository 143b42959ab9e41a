pub mod consumption_queries;

pub use consumption_queries::{
    count_readings, ensure_schema, latest_interval_start, readings_for_period, upsert_readings,
};
