use crate::domain::{ConfigGraph, Container, FleetError, order_by_dependency};
use crate::services::ContainerService;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RebuildOptions {
    pub ignore_cache: bool,
    /// Only build images that do not exist locally yet.
    pub only_missing: bool,
    pub ignore_dependencies: bool,
}

/// Sequences stop/start/rebuild across many containers, honoring link
/// integrity through the dependency resolver.
pub struct Orchestrator {
    containers: Arc<ContainerService>,
}

impl Orchestrator {
    pub fn new(containers: Arc<ContainerService>) -> Self {
        Self { containers }
    }

    /// Stop the given containers and, unless told otherwise, everything
    /// that depends on them. Returns all containers that were stopped,
    /// including the ones stopped only because of dependency propagation.
    pub fn stop_many<'a>(
        &self,
        graph: &'a ConfigGraph,
        requested: &[&'a Container],
        ignore_dependencies: bool,
    ) -> Result<Vec<&'a Container>> {
        self.stop_many_inner(graph, requested, ignore_dependencies, false)
    }

    fn stop_many_inner<'a>(
        &self,
        graph: &'a ConfigGraph,
        requested: &[&'a Container],
        ignore_dependencies: bool,
        message_restart: bool,
    ) -> Result<Vec<&'a Container>> {
        let mut stop_containers =
            order_by_dependency(graph, requested, false, !ignore_dependencies);
        stop_containers.reverse();

        let requested_names: HashSet<&str> = requested.iter().map(|c| c.name.as_str()).collect();
        let mut added: Vec<&str> = Vec::new();
        for container in &stop_containers {
            if !requested_names.contains(container.name.as_str())
                && self.containers.is_running(graph, container)?
            {
                added.push(&container.name);
            }
        }
        if !added.is_empty() {
            info!(
                "also {} containers affected by this action: {}",
                if message_restart { "restarting" } else { "stopping" },
                added.join(", ")
            );
        }

        for container in &stop_containers {
            self.containers.stop(graph, container)?;
        }
        Ok(stop_containers)
    }

    /// Stop and start again, pulling in whatever the restart set needs.
    pub fn restart_many<'a>(
        &self,
        graph: &'a ConfigGraph,
        requested: &[&'a Container],
        ignore_dependencies: bool,
    ) -> Result<()> {
        // also restart the containers that would be broken by this
        let stopped = self.stop_many_inner(graph, requested, ignore_dependencies, true)?;

        let start_containers = order_by_dependency(graph, &stopped, true, false);
        let stopped_names: HashSet<&str> = stopped.iter().map(|c| c.name.as_str()).collect();
        let added: Vec<&str> = start_containers
            .iter()
            .filter(|c| !stopped_names.contains(c.name.as_str()))
            .map(|c| c.name.as_str())
            .collect();
        if !added.is_empty() {
            info!(
                "also starting necessary dependencies, if not yet running: {}",
                added.join(", ")
            );
        }

        for container in start_containers {
            if container.only_build {
                // meta entry, never started as a live process
                continue;
            }
            let was_stopped = stopped_names.contains(container.name.as_str());
            if !was_stopped && self.containers.is_running(graph, container)? {
                continue;
            }
            if self.skip_for_missing_image(graph, container, ignore_dependencies)? {
                continue;
            }
            self.containers.start(graph, container)?;
        }
        Ok(())
    }

    /// A dependency that is merely stopped degrades to a warning at start
    /// time, but a missing image - the container's own, or that of one of
    /// its dependencies - is fatal. With `ignore_dependencies` the
    /// affected container is skipped with a warning instead.
    fn skip_for_missing_image(
        &self,
        graph: &ConfigGraph,
        container: &Container,
        ignore_dependencies: bool,
    ) -> Result<bool> {
        let mut missing: Option<&Container> = None;
        if !self.containers.is_built(container)? {
            missing = Some(container);
        }
        for link in &container.links {
            if missing.is_some() {
                break;
            }
            let dependency = graph
                .get(link)
                .expect("links are validated at configuration load");
            if !self.containers.is_built(dependency)? {
                missing = Some(dependency);
            }
        }
        let Some(missing) = missing else {
            return Ok(false);
        };
        if ignore_dependencies {
            warn!(
                "image '{}' is missing; skipping start of '{}'",
                missing.image, container.name
            );
            return Ok(true);
        }
        Err(FleetError::ImageNotFound {
            name: missing.name.clone(),
            image: missing.image.clone(),
        }
        .into())
    }

    /// Rebuild images (respecting `only_missing` and the cache flag) and
    /// then restart the same container set.
    pub fn rebuild_many<'a>(
        &self,
        graph: &'a ConfigGraph,
        requested: &[&'a Container],
        options: &RebuildOptions,
    ) -> Result<()> {
        for container in requested {
            if options.only_missing && self.containers.is_built(container)? {
                debug!("image of '{}' already exists, not rebuilding", container.name);
                continue;
            }
            self.containers
                .rebuild(graph, container, options.ignore_cache)?;
        }
        self.restart_many(graph, requested, options.ignore_dependencies)
    }

    /// Bring up only what is down: restart the subset of the requested
    /// containers that is neither live nor build-only.
    pub fn start_many<'a>(
        &self,
        graph: &'a ConfigGraph,
        requested: &[&'a Container],
        ignore_dependencies: bool,
    ) -> Result<()> {
        let mut to_start = Vec::new();
        for container in requested {
            if container.only_build {
                continue;
            }
            if !self.containers.is_running(graph, container)? {
                to_start.push(*container);
            }
        }
        self.restart_many(graph, &to_start, ignore_dependencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::StateStore;
    use crate::test_support::{MemoryStateStore, MockRuntime, test_graph, test_graph_with};

    struct Fixture {
        runtime: Arc<MockRuntime>,
        state: Arc<MemoryStateStore>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let runtime = Arc::new(MockRuntime::new());
        let state = Arc::new(MemoryStateStore::new());
        let containers = Arc::new(ContainerService::new(
            runtime.clone(),
            state.clone() as Arc<dyn StateStore>,
        ));
        Fixture {
            runtime,
            state,
            orchestrator: Orchestrator::new(containers),
        }
    }

    impl Fixture {
        fn seed_running(&self, name: &str) {
            let instance = format!("{name}-1");
            let id = format!("id-{name}-1");
            self.runtime
                .add_running_instance(&instance, &id, &format!("{name}:latest"));
            self.state.record_instance(name, &instance, &id).unwrap();
        }

        fn seed_image(&self, name: &str) {
            self.runtime.add_image(&format!("{name}:latest"));
        }
    }

    fn stop_commands(runtime: &MockRuntime) -> Vec<String> {
        runtime
            .get_commands()
            .into_iter()
            .filter(|c| c.starts_with("stop:"))
            .collect()
    }

    fn run_commands(runtime: &MockRuntime) -> Vec<String> {
        runtime
            .get_commands()
            .into_iter()
            .filter(|c| c.starts_with("run:"))
            .collect()
    }

    #[test]
    fn stop_many_stops_dependents_first() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"]), ("proxy", &["app"])]);
        let f = fixture();
        for name in ["db", "app", "proxy"] {
            f.seed_image(name);
            f.seed_running(name);
        }

        let stopped = f
            .orchestrator
            .stop_many(&graph, &[graph.get("db").unwrap()], false)
            .unwrap();

        let names: Vec<&str> = stopped.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["proxy", "app", "db"]);
        assert_eq!(
            stop_commands(&f.runtime),
            vec!["stop:proxy-1", "stop:app-1", "stop:db-1"]
        );
    }

    #[test]
    fn stop_many_can_ignore_dependents() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        for name in ["db", "app"] {
            f.seed_image(name);
            f.seed_running(name);
        }

        let stopped = f
            .orchestrator
            .stop_many(&graph, &[graph.get("db").unwrap()], true)
            .unwrap();

        assert_eq!(stopped.len(), 1);
        assert_eq!(stop_commands(&f.runtime), vec!["stop:db-1"]);
    }

    #[test]
    fn restart_many_starts_dependencies_before_dependents() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        for name in ["db", "app"] {
            f.seed_image(name);
            f.seed_running(name);
        }

        f.orchestrator
            .restart_many(&graph, &[graph.get("app").unwrap()], false)
            .unwrap();

        // app's restart pulls db in as a dependency; db was not stopped
        // and is still running, so only app is started again
        let runs = run_commands(&f.runtime);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].starts_with("run:app-"));
    }

    #[test]
    fn restart_many_restarts_broken_dependents() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        for name in ["db", "app"] {
            f.seed_image(name);
            f.seed_running(name);
        }

        f.orchestrator
            .restart_many(&graph, &[graph.get("db").unwrap()], false)
            .unwrap();

        let runs = run_commands(&f.runtime);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].starts_with("run:db-"), "db must start first: {runs:?}");
        assert!(runs[1].starts_with("run:app-"));
    }

    #[test]
    fn restart_many_skips_only_build_containers() {
        let graph = test_graph_with(&[("base", &[], true), ("app", &[], false)]);
        let f = fixture();
        f.seed_image("base");
        f.seed_image("app");

        f.orchestrator
            .restart_many(
                &graph,
                &[graph.get("base").unwrap(), graph.get("app").unwrap()],
                false,
            )
            .unwrap();

        let runs = run_commands(&f.runtime);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].starts_with("run:app-"));
    }

    #[test]
    fn missing_dependency_image_is_fatal_by_default() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        f.seed_image("app");
        // db image never built

        let err = f
            .orchestrator
            .restart_many(&graph, &[graph.get("app").unwrap()], false)
            .unwrap_err();
        assert!(
            err.downcast_ref::<FleetError>()
                .is_some_and(|e| matches!(e, FleetError::ImageNotFound { .. }))
        );
    }

    #[test]
    fn missing_dependency_image_skips_dependent_when_ignored() {
        let graph = test_graph(&[("db", &[]), ("cache", &[]), ("app", &["db"])]);
        let f = fixture();
        f.seed_image("app");
        f.seed_image("cache");

        f.orchestrator
            .restart_many(
                &graph,
                &[graph.get("app").unwrap(), graph.get("cache").unwrap()],
                true,
            )
            .unwrap();

        // app is skipped because db's image is absent; cache still starts
        let runs = run_commands(&f.runtime);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].starts_with("run:cache-"));
    }

    #[test]
    fn start_many_only_touches_stopped_containers() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        for name in ["db", "app"] {
            f.seed_image(name);
        }
        f.seed_running("db");

        f.orchestrator
            .start_many(
                &graph,
                &[graph.get("db").unwrap(), graph.get("app").unwrap()],
                false,
            )
            .unwrap();

        let runs = run_commands(&f.runtime);
        assert_eq!(runs.len(), 1, "running db must not be restarted: {runs:?}");
        assert!(runs[0].starts_with("run:app-"));
    }

    #[test]
    fn rebuild_many_skips_existing_images_when_only_missing() {
        let graph = test_graph(&[("db", &[]), ("app", &["db"])]);
        let f = fixture();
        f.seed_image("db");

        f.orchestrator
            .rebuild_many(
                &graph,
                &[graph.get("db").unwrap(), graph.get("app").unwrap()],
                &RebuildOptions {
                    only_missing: true,
                    ..RebuildOptions::default()
                },
            )
            .unwrap();

        let commands = f.runtime.get_commands();
        assert!(!commands.contains(&"build:db:latest".to_string()));
        assert!(commands.contains(&"build:app:latest".to_string()));
    }
}
