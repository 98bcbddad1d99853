use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

/// Engine options for starting one new container instance.
#[derive(Debug, Clone)]
pub struct RunSpec<'a> {
    /// Name of the new instance (instance name, not the configured name).
    pub name: &'a str,
    pub image: &'a str,
    pub ports: &'a [String],
    pub env: &'a [String],
    pub volumes: &'a [String],
    /// Resolved link pairs: (live instance name of the dependency, alias).
    pub links: &'a [(String, String)],
    pub extra_args: &'a [String],
    pub labels: &'a [(String, String)],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// ID of the image the instance was created from.
    pub image_id: String,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    /// Image reference the instance was started from.
    pub image: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Contract against the container engine. All operations are synchronous;
/// long-running builds and starts block the caller.
pub trait ContainerRuntime: Send + Sync + Debug {
    fn build_image(&self, path: &Path, image: &str, no_cache: bool) -> Result<()>;

    fn tag_image(&self, image: &str, alias: &str) -> Result<()>;

    /// Start a new detached instance; returns its engine ID.
    fn run_container(&self, spec: &RunSpec) -> Result<String>;

    fn stop_container(&self, id: &str) -> Result<()>;

    fn remove_container(&self, id: &str) -> Result<()>;

    fn remove_image(&self, id: &str) -> Result<()>;

    /// `None` when the instance does not exist (anymore).
    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInspect>>;

    fn image_exists(&self, image: &str) -> Result<bool>;

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageSummary>>;

    /// Stream logs to the caller's terminal.
    fn logs(&self, id: &str, follow: bool, tail: usize) -> Result<()>;

    /// Run a command in a live instance, returning its exit code.
    fn exec_batch(&self, id: &str, command: &str, timeout: Duration) -> Result<i32>;

    fn exec_interactive(&self, id: &str, command: &str) -> Result<()>;

    /// Run a command in a throwaway instance of an image, returning its output.
    fn run_batch(&self, image: &str, command: &str) -> Result<String>;

    fn run_interactive(&self, image: &str, command: &str, labels: &[(String, String)])
    -> Result<()>;
}

/// Persisted per-container instance identity, keyed by configured name.
/// Kept behind a trait so the orchestrator is testable without a filesystem.
pub trait StateStore: Send + Sync + Debug {
    fn instance_name(&self, container: &str) -> Result<Option<String>>;

    fn instance_id(&self, container: &str) -> Result<Option<String>>;

    /// Record the identity of a freshly started instance. Pre-existing
    /// records are preserved under a `.previous` suffix before being
    /// overwritten, and the new records are durable on return.
    fn record_instance(&self, container: &str, instance_name: &str, instance_id: &str)
    -> Result<()>;
}
