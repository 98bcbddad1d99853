use crate::domain::traits::StateStore;
use crate::domain::{ConfigGraph, Container, ContainerRuntime, FleetError, RunSpec};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label put on throwaway instances (interactive shells) so the
/// unmanaged-instance check leaves them alone.
pub const TEMPORARY_LABEL: &str = "fleetbox.temporary";

const LOG_TAIL_LINES: usize = 1000;

/// Per-container operations shared by the orchestrator and the status
/// engine. Holds no state of its own; instance identity lives in the
/// [`StateStore`].
pub struct ContainerService {
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<dyn StateStore>,
}

impl ContainerService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, state: Arc<dyn StateStore>) -> Self {
        Self { runtime, state }
    }

    pub fn instance_name(&self, container: &Container) -> Result<Option<String>> {
        self.state.instance_name(&container.name)
    }

    pub fn is_built(&self, container: &Container) -> Result<bool> {
        self.runtime.image_exists(&container.image)
    }

    /// Error out if a live container runs from this image without being
    /// traceable to a tracked instance record. The system must never
    /// silently adopt or destroy containers it does not recognize.
    pub fn check_unmanaged(&self, graph: &ConfigGraph, container: &Container) -> Result<()> {
        let running = self.runtime.list_containers(false)?;
        let mut tracked: HashSet<String> = HashSet::new();
        for configured in graph.all() {
            if let Some(id) = self.state.instance_id(&configured.name)? {
                tracked.insert(id);
            }
        }
        for live in running {
            if live.image == container.image
                && !tracked.contains(&live.id)
                && !live.labels.contains_key(TEMPORARY_LABEL)
            {
                return Err(FleetError::UnmanagedInstance {
                    id: live.id,
                    image: container.image.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn is_running(&self, graph: &ConfigGraph, container: &Container) -> Result<bool> {
        self.check_unmanaged(graph, container)?;
        let Some(id) = self.state.instance_id(&container.name)? else {
            return Ok(false);
        };
        Ok(self
            .runtime
            .inspect_container(&id)?
            .map(|inspect| inspect.running)
            .unwrap_or(false))
    }

    /// Seconds since the last start of the tracked instance, if known.
    pub fn time_running(&self, container: &Container) -> Result<Option<Duration>> {
        let Some(id) = self.state.instance_id(&container.name)? else {
            return Ok(None);
        };
        let Some(inspect) = self.runtime.inspect_container(&id)? else {
            return Ok(None);
        };
        let Some(started_at) = inspect.started_at else {
            return Ok(None);
        };
        Ok((Utc::now() - started_at).to_std().ok())
    }

    /// Start a fresh instance of the container.
    ///
    /// Instance names cannot be reused by the engine, so each start
    /// generates a new timestamped one. Links to dependencies that are
    /// not live are degraded with a warning; the container still starts.
    pub fn start(&self, graph: &ConfigGraph, container: &Container) -> Result<()> {
        assert!(
            !self.is_running(graph, container)?,
            "container '{}' is already running",
            container.name
        );
        if !self.is_built(container)? {
            return Err(FleetError::ImageNotFound {
                name: container.name.clone(),
                image: container.image.clone(),
            }
            .into());
        }

        let instance = format!(
            "{}-{}",
            container.name,
            Utc::now().format("%Y-%m-%d_%H_%M_%S%.9f")
        );

        let mut links: Vec<(String, String)> = Vec::new();
        for link in &container.links {
            let dependency = graph
                .get(link)
                .expect("links are validated at configuration load");
            if !self.is_running(graph, dependency)? {
                // only happens when startup of a dependency failed earlier
                warn!(
                    "linked container {} is not running - container {} will be \
                     missing this link until being restarted!",
                    dependency.name, container.name
                );
                continue;
            }
            match self.state.instance_name(&dependency.name)? {
                Some(dep_instance) => links.push((dep_instance, dependency.name.clone())),
                None => warn!(
                    "linked container {} is running but has no recorded instance name",
                    dependency.name
                ),
            }
        }

        let options = &container.run_options;
        let spec = RunSpec {
            name: &instance,
            image: &container.image,
            ports: &options.ports,
            env: &options.env,
            volumes: &options.volumes,
            links: &links,
            extra_args: &options.extra_args,
            labels: &[],
        };
        info!("starting container {instance}");
        let id = self.runtime.run_container(&spec)?;
        self.state
            .record_instance(&container.name, &instance, id.trim())
            .with_context(|| format!("recording new instance of {}", container.name))?;
        Ok(())
    }

    pub fn stop(&self, graph: &ConfigGraph, container: &Container) -> Result<()> {
        let instance = self.state.instance_name(&container.name)?;
        match instance {
            Some(instance) if self.is_running(graph, container)? => {
                info!("stopping {} container {}", container.name, instance);
                self.runtime.stop_container(&instance)
            }
            _ => {
                debug!("no known instance of '{}' running", container.name);
                Ok(())
            }
        }
    }

    /// Rebuild the container image and apply alias tags. Containers
    /// without a build path have nothing to build.
    pub fn rebuild(
        &self,
        graph: &ConfigGraph,
        container: &Container,
        ignore_cache: bool,
    ) -> Result<()> {
        let Some(path) = &container.path else {
            debug!("container {} has no build path, nothing to build", container.name);
            return Ok(());
        };
        // run the unmanaged check while the old image still has its name;
        // after the build the previous image is nameless and untraceable
        self.check_unmanaged(graph, container)?;

        info!("rebuilding image {}", container.image);
        self.runtime.build_image(path, &container.image, ignore_cache)?;
        for tag in &container.alias_tags {
            self.runtime.tag_image(&container.image, tag)?;
        }
        Ok(())
    }

    pub fn logs(&self, container: &Container, follow: bool) -> Result<()> {
        let Some(instance) = self.state.instance_name(&container.name)? else {
            bail!("no known instance of container '{}'", container.name);
        };
        if !follow {
            warn!(
                "output is truncated to the last {} lines if longer",
                LOG_TAIL_LINES
            );
        }
        self.runtime.logs(&instance, follow, LOG_TAIL_LINES)
    }

    /// Open a shell inside the running instance, or inside a labeled
    /// throwaway instance of the image.
    pub fn interactive_shell(
        &self,
        graph: &ConfigGraph,
        container: &Container,
        new_instance: bool,
    ) -> Result<()> {
        if new_instance {
            info!("starting a new container instance with an interactive shell");
            let labels = [(TEMPORARY_LABEL.to_string(), "true".to_string())];
            return self
                .runtime
                .run_interactive(&container.image, "bash", &labels);
        }
        info!("starting a shell inside the running instance");
        if !self.is_running(graph, container)? {
            bail!(
                "container '{}' is not running; use --new-instance to start a shell \
                 in a separate instance",
                container.name
            );
        }
        let instance = self
            .state
            .instance_name(&container.name)?
            .with_context(|| format!("no recorded instance name for {}", container.name))?;
        self.runtime.exec_interactive(&instance, "bash")
    }

    /// Run the configured update check in a throwaway instance. Non-empty
    /// output means the image has outdated packages.
    pub fn check_updates(&self, container: &Container) -> Result<bool> {
        let Some(command) = &container.update_check else {
            return Ok(false);
        };
        let output = self.runtime.run_batch(&container.image, command)?;
        let output = output.trim();
        if output.is_empty() {
            Ok(false)
        } else {
            warn!("container {} has outdated packages: {output}", container.name);
            Ok(true)
        }
    }
}
