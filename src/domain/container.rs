use super::Probe;
use anyhow::{Result, bail};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// A managed container as declared in the configuration.
///
/// Immutable for the duration of a run; identified across invocations by
/// `name` plus the persisted instance records.
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    /// Image reference, `{name}:latest` unless overridden.
    pub image: String,
    /// Build context directory. `None` means the image is pulled or built
    /// elsewhere and cannot be rebuilt here.
    pub path: Option<PathBuf>,
    /// Never run as a live process (base images, monitoring-only entries).
    pub only_build: bool,
    /// Names of containers this one depends on. Targets must be declared
    /// earlier in the configuration.
    pub links: Vec<String>,
    pub probes: Vec<Probe>,
    pub sleep_before_probe: Duration,
    pub startup_grace: Duration,
    /// Extra tags applied to the image after a build.
    pub alias_tags: Vec<String>,
    pub run_options: RunOptions,
    /// Shell command run in a throwaway instance by `check-updates`.
    /// Non-empty output means packages are outdated.
    pub update_check: Option<String>,
}

/// Engine options applied when a new instance is started.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub ports: Vec<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub extra_args: Vec<String>,
}

/// The ordered list of all configured containers.
///
/// Construction validates the two invariants every engine relies on:
/// names are unique, and every link targets a container declared strictly
/// earlier in the list. Together these guarantee the graph is acyclic and
/// already topologically sorted.
#[derive(Debug, Clone)]
pub struct ConfigGraph {
    containers: Vec<Container>,
}

impl ConfigGraph {
    pub fn new(containers: Vec<Container>) -> Result<Self> {
        let mut seen: HashSet<&str> = HashSet::new();
        for container in &containers {
            for link in &container.links {
                if !seen.contains(link.as_str()) {
                    bail!(
                        "container '{}' links to '{}', which is not declared before it; \
                         containers may only link to containers defined earlier",
                        container.name,
                        link
                    );
                }
            }
            if !seen.insert(&container.name) {
                bail!("duplicate container name '{}'", container.name);
            }
        }
        Ok(Self { containers })
    }

    pub fn all(&self) -> &[Container] {
        &self.containers
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.name == name)
    }

    /// Resolve selector names to containers, keeping configuration order.
    /// An empty selector means the whole graph.
    pub fn select(&self, names: &[String]) -> Result<Vec<&Container>> {
        if names.is_empty() {
            return Ok(self.containers.iter().collect());
        }
        for name in names {
            if self.get(name).is_none() {
                bail!("unknown container name '{}'", name);
            }
        }
        Ok(self
            .containers
            .iter()
            .filter(|c| names.iter().any(|n| n == &c.name))
            .collect())
    }
}
