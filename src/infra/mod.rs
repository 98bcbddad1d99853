pub mod config;
mod docker_adapter;
mod lockfile;
mod state;

pub use docker_adapter::DockerAdapter;
pub use lockfile::LockFile;
pub use state::FsStateStore;
