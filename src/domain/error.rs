use thiserror::Error;

/// Errors the engines need to tell apart. Everything else travels as
/// `anyhow::Error` with context attached at the call site.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("no image '{image}' found on the local system for container '{name}'")]
    ImageNotFound { name: String, image: String },

    #[error("another instance is already running: {0}")]
    AlreadyRunning(String),

    #[error(
        "container '{id}' is running from image '{image}' but is not managed by fleetbox; \
         stop it yourself and restart it via fleetbox"
    )]
    UnmanagedInstance { id: String, image: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
