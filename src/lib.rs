pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
// In a real production crate, we might use a feature flag "test-utils"
pub mod test_support;

pub use domain::{
    ConfigGraph, Container, ContainerRuntime, ContainerStatus, FleetError, Probe, StatusReport,
    order_by_dependency,
};
pub use infra::{DockerAdapter, FsStateStore, LockFile};
pub use services::{
    CleanupEngine, CleanupOptions, ContainerService, Orchestrator, RebuildOptions, StatusService,
};
