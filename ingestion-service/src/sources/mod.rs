pub mod octopus;
pub mod paginated;

pub use octopus::OctopusClient;
pub use paginated::{ConsumptionApi, ConsumptionPage, PageCursor, PaginatedConsumptionSource, RawConsumption};
