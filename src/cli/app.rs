use crate::domain::traits::StateStore;
use crate::domain::{ConfigGraph, Container, ContainerRuntime};
use crate::infra::config;
use crate::infra::{DockerAdapter, FsStateStore};
use crate::services::{
    CleanupEngine, CleanupOptions, ContainerService, Orchestrator, RebuildOptions, StatusService,
    run_monitor,
};
use crate::services::{HistoryStore, MonitorOutcome};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Exit code contract exposed to scripts and cron.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Failures observed while another instance was mutating state; ignorable.
pub const EXIT_DEGRADED: i32 = 2;

/// Settle time between (re)starting containers and judging their status.
const STARTUP_SETTLE: Duration = Duration::from_secs(2);

/// Wires the engines together for one invocation.
pub struct App {
    graph: ConfigGraph,
    containers: Arc<ContainerService>,
    orchestrator: Orchestrator,
    status: StatusService,
    cleanup: CleanupEngine,
    history: HistoryStore,
    /// Skip the settle sleep; set in tests.
    settle: Duration,
}

impl App {
    pub fn new(config_dir: &Path) -> Result<Self> {
        let runtime = Arc::new(DockerAdapter::new());
        let state = Arc::new(FsStateStore::new(&config::state_dir(config_dir))?);
        Self::with_runtime(config_dir, runtime, state)
    }

    pub fn with_runtime(
        config_dir: &Path,
        runtime: Arc<dyn ContainerRuntime>,
        state: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let graph = config::load_graph(config_dir)?;
        let containers = Arc::new(ContainerService::new(runtime.clone(), state.clone()));
        let orchestrator = Orchestrator::new(containers.clone());
        let status = StatusService::new(runtime.clone(), containers.clone());
        let cleanup = CleanupEngine::new(runtime, state);
        let history = HistoryStore::new(&config::state_dir(config_dir).join("status_history.json"));
        Ok(Self {
            graph,
            containers,
            orchestrator,
            status,
            cleanup,
            history,
            settle: STARTUP_SETTLE,
        })
    }

    #[doc(hidden)]
    pub fn without_settle(mut self) -> Self {
        self.settle = Duration::ZERO;
        self
    }

    pub fn graph(&self) -> &ConfigGraph {
        &self.graph
    }

    fn select(&self, names: &[String]) -> Result<Vec<&Container>> {
        self.graph.select(names)
    }

    /// Print per-container verdicts and map them to the exit contract.
    pub fn status(&self, names: &[String], other_instance_running: bool) -> Result<i32> {
        let selected = self.select(names)?;
        let reports = self.status.report_many(&self.graph, &selected, false)?;

        let mut okay = true;
        for report in &reports {
            let marker = if report.status.is_acceptable() {
                "[ ok ]"
            } else {
                okay = false;
                "[fail]"
            };
            println!("{marker} {}: {}", report.name, report.message);
        }

        if okay {
            println!("Success.");
            return Ok(EXIT_OK);
        }
        if other_instance_running {
            warn!(
                "some containers are not working, but another instance is currently \
                 active - the state may be mid-change"
            );
            return Ok(EXIT_DEGRADED);
        }
        println!("Some containers are not working!");
        Ok(EXIT_FAILURE)
    }

    pub fn start(
        &self,
        names: &[String],
        ignore_dependencies: bool,
        other_instance_running: bool,
    ) -> Result<i32> {
        let selected = self.select(names)?;
        self.orchestrator
            .start_many(&self.graph, &selected, ignore_dependencies)?;
        thread::sleep(self.settle);
        self.status(names, other_instance_running)
    }

    pub fn stop(&self, names: &[String], ignore_dependencies: bool) -> Result<()> {
        let selected = self.select(names)?;
        self.orchestrator
            .stop_many(&self.graph, &selected, ignore_dependencies)?;
        Ok(())
    }

    pub fn restart(
        &self,
        names: &[String],
        ignore_dependencies: bool,
        other_instance_running: bool,
    ) -> Result<i32> {
        let selected = self.select(names)?;
        self.orchestrator
            .restart_many(&self.graph, &selected, ignore_dependencies)?;
        thread::sleep(self.settle);
        self.status(names, other_instance_running)
    }

    pub fn rebuild(
        &self,
        names: &[String],
        options: &RebuildOptions,
        other_instance_running: bool,
    ) -> Result<i32> {
        let selected = self.select(names)?;
        self.orchestrator
            .rebuild_many(&self.graph, &selected, options)?;
        thread::sleep(self.settle);
        self.status(names, other_instance_running)
    }

    pub fn cleanup(&self, options: &CleanupOptions) -> Result<()> {
        self.cleanup.run(&self.graph, options)
    }

    /// One monitoring tick over the persisted history window.
    pub fn monitor(&self, names: &[String]) -> Result<i32> {
        let selected = self.select(names)?;
        let snapshot = self.status.snapshot(&self.graph, &selected)?;
        let MonitorOutcome {
            changes_to_report,
            reports,
        } = run_monitor(&self.history, snapshot)?;

        for report in &reports {
            let marker = if report.overall_status.is_acceptable() {
                "[ ok ]"
            } else {
                "[fail]"
            };
            let suffix = if report.changed { " (changed)" } else { "" };
            println!(
                "{marker} {}: {}{suffix}",
                report.container_name, report.current_msg
            );
        }
        Ok(if changes_to_report { EXIT_FAILURE } else { EXIT_OK })
    }

    pub fn logs(&self, name: &str, follow: bool) -> Result<()> {
        let selected = self.select(&[name.to_string()])?;
        self.containers.logs(selected[0], follow)
    }

    pub fn shell(&self, name: &str, new_instance: bool) -> Result<()> {
        let selected = self.select(&[name.to_string()])?;
        self.containers
            .interactive_shell(&self.graph, selected[0], new_instance)
    }

    pub fn check_updates(&self, names: &[String]) -> Result<i32> {
        let selected = self.select(names)?;
        let mut outdated: Vec<&str> = Vec::new();
        for container in selected {
            if self.containers.check_updates(container)? {
                outdated.push(&container.name);
            }
        }
        if outdated.is_empty() {
            println!("Packages are up to date.");
            return Ok(EXIT_OK);
        }
        println!("Some containers have outdated packages: {}", outdated.join(" "));
        println!("Rebuild them with: fleetbox rebuild --no-cache {}", outdated.join(" "));
        Ok(EXIT_FAILURE)
    }
}
