pub mod config;
pub mod ingest;
pub mod observability;
pub mod period;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use ingest::{Ingestion, RunMode, RunOutcome, RunRequest};
pub use pipeline::{Envelope, Pipeline, PipelineError};
