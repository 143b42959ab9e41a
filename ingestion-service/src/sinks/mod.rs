pub mod preview;
pub mod upsert;

pub use preview::{Preview, PreviewSink};
pub use upsert::UpsertSink;
