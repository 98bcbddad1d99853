use crate::domain::{
    ConfigGraph, Container, ContainerRuntime, ContainerStatus, FleetError, StatusInputs,
    StatusReport, evaluate,
};
use crate::services::ContainerService;
use anyhow::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// One full status snapshot: configured name to (status, message).
pub type StatusSnapshot = BTreeMap<String, (ContainerStatus, String)>;

/// Computes fresh per-container health verdicts. Stateless; every query
/// re-evaluates builds, liveness, probes and grace time.
pub struct StatusService {
    runtime: Arc<dyn ContainerRuntime>,
    containers: Arc<ContainerService>,
}

impl StatusService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, containers: Arc<ContainerService>) -> Self {
        Self { runtime, containers }
    }

    /// Evaluate one container.
    ///
    /// Contract violations (unmanaged instances) propagate as errors;
    /// other gateway failures degrade into a FAILED report so one flaky
    /// engine call cannot take down a whole status run.
    pub fn report(
        &self,
        graph: &ConfigGraph,
        container: &Container,
        sleep_before: bool,
    ) -> Result<StatusReport> {
        let is_built = match self.containers.is_built(container) {
            Ok(v) => v,
            Err(e) => return Ok(degraded_report(container, e)),
        };
        let running = match self.containers.is_running(graph, container) {
            Ok(v) => v,
            Err(e) if is_contract_violation(&e) => return Err(e),
            Err(e) => return Ok(degraded_report(container, e)),
        };
        let time_running = match self.containers.time_running(container) {
            Ok(v) => v,
            Err(e) => return Ok(degraded_report(container, e)),
        };

        let probes_passed = self.run_probes(container, running, sleep_before)?;

        let (status, message) = evaluate(&StatusInputs {
            is_built,
            only_build: container.only_build,
            probe_count: container.probes.len(),
            probes_passed,
            running,
            time_running,
            startup_grace: container.startup_grace,
        });
        Ok(StatusReport {
            name: container.name.clone(),
            status,
            message,
        })
    }

    pub fn report_many(
        &self,
        graph: &ConfigGraph,
        containers: &[&Container],
        sleep_before: bool,
    ) -> Result<Vec<StatusReport>> {
        containers
            .iter()
            .map(|container| self.report(graph, container, sleep_before))
            .collect()
    }

    /// A persisted-history-shaped snapshot of the given containers.
    pub fn snapshot(&self, graph: &ConfigGraph, containers: &[&Container]) -> Result<StatusSnapshot> {
        let mut snapshot = StatusSnapshot::new();
        for report in self.report_many(graph, containers, false)? {
            snapshot.insert(report.name, (report.status, report.message));
        }
        Ok(snapshot)
    }

    /// AND over all probes. Probes themselves never error.
    fn run_probes(&self, container: &Container, running: bool, sleep_before: bool) -> Result<bool> {
        if container.probes.is_empty() {
            if !container.only_build {
                warn!(
                    "no tests defined for container {}, a build error might go unnoticed!",
                    container.name
                );
            }
            return Ok(true);
        }
        if sleep_before {
            thread::sleep(container.sleep_before_probe);
        }
        // shell probes need the live instance to exec into
        let instance = if running {
            self.containers.instance_name(container)?
        } else {
            None
        };
        let mut passed = true;
        for probe in &container.probes {
            passed = probe.run(self.runtime.as_ref(), instance.as_deref()) && passed;
        }
        Ok(passed)
    }
}

fn degraded_report(container: &Container, error: Error) -> StatusReport {
    StatusReport {
        name: container.name.clone(),
        status: ContainerStatus::Failed,
        message: format!("status query failed: {error:#}"),
    }
}

fn is_contract_violation(error: &Error) -> bool {
    error
        .downcast_ref::<FleetError>()
        .is_some_and(|e| matches!(e, FleetError::UnmanagedInstance { .. }))
}
