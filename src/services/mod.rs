mod cleanup;
mod container_service;
mod monitor;
mod orchestrator;
pub mod status;

pub use cleanup::{CleanupEngine, CleanupOptions};
pub use container_service::{ContainerService, TEMPORARY_LABEL};
pub use monitor::{
    ExtendedStatusReport, HistoryStore, MonitorOutcome, STATUS_HISTORY_LENGTH,
    detect_flapping_and_changes, run_monitor,
};
pub use orchestrator::{Orchestrator, RebuildOptions};
pub use status::{StatusService, StatusSnapshot};
