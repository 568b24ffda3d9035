//! sentinel-orchestrator: run scheduling, cooperative cancellation, and
//! durable scan history for the Sentinel discovery core.

pub mod history;
pub mod orchestrator;
pub mod settings;

pub use history::{HistoryStore, MemoryHistory, PgHistory, ScanRecord};
pub use orchestrator::{Orchestrator, ScheduleEntry};
pub use settings::Settings;
