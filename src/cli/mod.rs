pub mod app;

pub use app::{App, EXIT_DEGRADED, EXIT_FAILURE, EXIT_OK};
