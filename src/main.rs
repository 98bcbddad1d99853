use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetbox::cli::App;
use fleetbox::infra::config;
use fleetbox::infra::LockFile;
use fleetbox::services::{CleanupOptions, RebuildOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fleetbox",
    about = "Manage a declared fleet of containers on a single host"
)]
struct Cli {
    /// Configuration directory holding fleetbox.toml and the state files
    #[arg(long, env = "FLEETBOX_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Enable verbose log output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the health of the configured containers
    Status { containers: Vec<String> },
    /// Bring up containers that are not running
    Start {
        containers: Vec<String>,
        /// Warn instead of failing on missing dependencies
        #[arg(long)]
        ignore_dependencies: bool,
    },
    /// Stop containers, and the containers depending on them
    Stop {
        containers: Vec<String>,
        /// Do not stop dependent containers
        #[arg(long)]
        ignore_dependencies: bool,
    },
    /// Stop and start again, fixing up links
    Restart {
        containers: Vec<String>,
        #[arg(long)]
        ignore_dependencies: bool,
    },
    /// Rebuild images and restart. Takes care of dependencies
    Rebuild {
        containers: Vec<String>,
        /// Build without using the image cache
        #[arg(long)]
        no_cache: bool,
        /// Only build images that are missing locally
        #[arg(long)]
        missing: bool,
        #[arg(long)]
        ignore_dependencies: bool,
    },
    /// Check images for pending package updates
    CheckUpdates { containers: Vec<String> },
    /// Exec a shell inside the running container
    Shell {
        container: String,
        /// Start the shell in a separate, temporary instance
        #[arg(long)]
        new_instance: bool,
    },
    /// Show logs of the container's tracked instance
    Logs {
        container: String,
        #[arg(short, long)]
        follow: bool,
    },
    /// Carefully remove old containers and images that are no longer used
    Cleanup {
        /// Only report what would be removed
        #[arg(long)]
        simulate: bool,
        #[arg(long, default_value_t = 31)]
        min_age_days: i64,
    },
    /// Evaluate status against the recorded history and report changes
    Monitor { containers: Vec<String> },
}

impl Commands {
    /// Mutating actions require the lock; read-only ones only probe it.
    fn needs_lock(&self) -> bool {
        !matches!(
            self,
            Commands::Status { .. }
                | Commands::CheckUpdates { .. }
                | Commands::Logs { .. }
                | Commands::Monitor { .. }
                | Commands::Shell { .. }
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_dir = cli.config_dir.unwrap_or_else(config::default_config_dir);
    let app = App::new(&config_dir)?;

    // keep the lock manager alive for the whole invocation; dropping it
    // releases the flock
    let mut lock = LockFile::open(&config::state_dir(&config_dir).join("fleetbox.lock"))?;
    let mut other_instance_running = false;
    if cli.command.needs_lock() {
        lock.lock()?;
    } else {
        other_instance_running = lock.another_instance_is_running();
        if other_instance_running {
            warn!(
                "another instance appears to be active ({}); results may be in flux",
                lock.holder_info()
            );
        }
    }

    match cli.command {
        Commands::Status { containers } => app.status(&containers, other_instance_running),
        Commands::Start {
            containers,
            ignore_dependencies,
        } => app.start(&containers, ignore_dependencies, other_instance_running),
        Commands::Stop {
            containers,
            ignore_dependencies,
        } => {
            app.stop(&containers, ignore_dependencies)?;
            Ok(0)
        }
        Commands::Restart {
            containers,
            ignore_dependencies,
        } => app.restart(&containers, ignore_dependencies, other_instance_running),
        Commands::Rebuild {
            containers,
            no_cache,
            missing,
            ignore_dependencies,
        } => app.rebuild(
            &containers,
            &RebuildOptions {
                ignore_cache: no_cache,
                only_missing: missing,
                ignore_dependencies,
            },
            other_instance_running,
        ),
        Commands::CheckUpdates { containers } => app.check_updates(&containers),
        Commands::Shell {
            container,
            new_instance,
        } => {
            app.shell(&container, new_instance)?;
            Ok(0)
        }
        Commands::Logs { container, follow } => {
            app.logs(&container, follow)?;
            Ok(0)
        }
        Commands::Cleanup {
            simulate,
            min_age_days,
        } => {
            app.cleanup(&CleanupOptions {
                simulate,
                min_age_days,
            })?;
            Ok(0)
        }
        Commands::Monitor { containers } => app.monitor(&containers),
    }
}
