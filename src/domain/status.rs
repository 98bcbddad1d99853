use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Health verdict for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Okay,
    Starting,
    Failed,
    Missing,
}

impl ContainerStatus {
    /// Statuses that count as "working" for the exit contract.
    pub fn is_acceptable(self) -> bool {
        matches!(self, ContainerStatus::Okay | ContainerStatus::Starting)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Okay => "OKAY",
            ContainerStatus::Starting => "STARTING",
            ContainerStatus::Failed => "FAILED",
            ContainerStatus::Missing => "MISSING",
        };
        f.write_str(s)
    }
}

/// Produced fresh on every status query; never persisted except by the
/// monitoring history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub name: String,
    pub status: ContainerStatus,
    pub message: String,
}

/// Everything the verdict depends on, gathered by the status service.
#[derive(Debug, Clone)]
pub struct StatusInputs {
    pub is_built: bool,
    pub only_build: bool,
    pub probe_count: usize,
    pub probes_passed: bool,
    pub running: bool,
    /// Seconds since the last start; `None` when unknown.
    pub time_running: Option<Duration>,
    pub startup_grace: Duration,
}

/// The status state machine. Stateless; decisions in strict priority order.
pub fn evaluate(inputs: &StatusInputs) -> (ContainerStatus, String) {
    if !inputs.is_built {
        return (
            ContainerStatus::Missing,
            "image is missing on the local system".to_string(),
        );
    }

    if inputs.only_build && inputs.probe_count == 0 {
        return (ContainerStatus::Okay, "(only build)".to_string());
    }

    let k = inputs.probe_count;
    if inputs.probes_passed {
        if inputs.running {
            return (ContainerStatus::Okay, format!("running, {k}/{k} tests ok"));
        }
        if inputs.only_build {
            return (ContainerStatus::Okay, format!("{k}/{k} tests ok"));
        }
        // a stopped process should not pass liveness probes
        let message = if k > 0 {
            "stopped, but tests succeeded".to_string()
        } else {
            "stopped".to_string()
        };
        return (ContainerStatus::Failed, message);
    }

    if inputs.only_build {
        return (ContainerStatus::Failed, "tests failed".to_string());
    }
    if inputs.running {
        let in_grace = inputs
            .time_running
            .is_some_and(|t| t < inputs.startup_grace);
        if in_grace {
            return (
                ContainerStatus::Starting,
                "starting up... tests not yet OK".to_string(),
            );
        }
        return (
            ContainerStatus::Failed,
            "running, but tests failed".to_string(),
        );
    }
    (ContainerStatus::Failed, "stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StatusInputs {
        StatusInputs {
            is_built: true,
            only_build: false,
            probe_count: 2,
            probes_passed: true,
            running: true,
            time_running: Some(Duration::from_secs(60)),
            startup_grace: Duration::from_secs(10),
        }
    }

    #[test]
    fn missing_image_wins_over_everything() {
        for only_build in [false, true] {
            for running in [false, true] {
                for probes_passed in [false, true] {
                    let (status, _) = evaluate(&StatusInputs {
                        is_built: false,
                        only_build,
                        probes_passed,
                        running,
                        ..inputs()
                    });
                    assert_eq!(status, ContainerStatus::Missing);
                }
            }
        }
    }

    #[test]
    fn only_build_without_probes_is_okay() {
        let (status, message) = evaluate(&StatusInputs {
            only_build: true,
            probe_count: 0,
            probes_passed: false,
            running: false,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Okay);
        assert_eq!(message, "(only build)");
    }

    #[test]
    fn running_and_passing_is_okay() {
        let (status, message) = evaluate(&inputs());
        assert_eq!(status, ContainerStatus::Okay);
        assert_eq!(message, "running, 2/2 tests ok");
    }

    #[test]
    fn only_build_with_passing_probes_is_okay() {
        let (status, message) = evaluate(&StatusInputs {
            only_build: true,
            running: false,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Okay);
        assert_eq!(message, "2/2 tests ok");
    }

    #[test]
    fn stopped_but_passing_is_an_anomaly() {
        let (status, message) = evaluate(&StatusInputs {
            running: false,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
        assert_eq!(message, "stopped, but tests succeeded");
    }

    #[test]
    fn stopped_without_probes_is_failed() {
        let (status, message) = evaluate(&StatusInputs {
            running: false,
            probe_count: 0,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
        assert_eq!(message, "stopped");
    }

    #[test]
    fn failing_probes_within_grace_is_starting() {
        let (status, _) = evaluate(&StatusInputs {
            probes_passed: false,
            time_running: Some(Duration::from_secs(5)),
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Starting);
    }

    #[test]
    fn grace_boundary_is_exclusive() {
        let (status, _) = evaluate(&StatusInputs {
            probes_passed: false,
            time_running: Some(Duration::from_secs(10)),
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
    }

    #[test]
    fn unknown_uptime_does_not_grant_grace() {
        let (status, _) = evaluate(&StatusInputs {
            probes_passed: false,
            time_running: None,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
    }

    #[test]
    fn failing_probes_on_only_build_is_failed() {
        let (status, message) = evaluate(&StatusInputs {
            only_build: true,
            probes_passed: false,
            running: false,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
        assert_eq!(message, "tests failed");
    }

    #[test]
    fn stopped_and_failing_is_stopped() {
        let (status, message) = evaluate(&StatusInputs {
            probes_passed: false,
            running: false,
            ..inputs()
        });
        assert_eq!(status, ContainerStatus::Failed);
        assert_eq!(message, "stopped");
    }
}
