use crate::domain::traits::StateStore;
use crate::domain::{ConfigGraph, ContainerRuntime};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub min_age_days: i64,
    /// Report candidates without removing anything.
    pub simulate: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            min_age_days: 31,
            simulate: false,
        }
    }
}

/// Age- and usage-based garbage collection of stopped containers and
/// dangling images.
pub struct CleanupEngine {
    runtime: Arc<dyn ContainerRuntime>,
    state: Arc<dyn StateStore>,
}

impl CleanupEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, state: Arc<dyn StateStore>) -> Self {
        Self { runtime, state }
    }

    pub fn run(&self, graph: &ConfigGraph, options: &CleanupOptions) -> Result<()> {
        let removed = self.cleanup_containers(graph, options)?;
        // in simulate mode pass the would-be removals on, so the image
        // pass computes the same result a real run would
        let simulated_removed = if options.simulate { removed } else { Vec::new() };
        self.cleanup_images(options, &simulated_removed)?;
        Ok(())
    }

    /// Remove stopped containers that finished long enough ago. Returns
    /// the IDs that were removed (or would be, in simulate mode).
    pub fn cleanup_containers(
        &self,
        graph: &ConfigGraph,
        options: &CleanupOptions,
    ) -> Result<Vec<String>> {
        let mut latest_instances: HashSet<String> = HashSet::new();
        for container in graph.all() {
            if let Some(id) = self.state.instance_id(&container.name)? {
                latest_instances.insert(id);
            }
        }

        let cutoff = Utc::now() - Duration::days(options.min_age_days);
        let mut removed = Vec::new();
        for summary in self.runtime.list_containers(true)? {
            let Some(inspect) = self.runtime.inspect_container(&summary.id)? else {
                continue;
            };
            if inspect.running {
                continue;
            }
            // never finished means there is nothing to age against
            let Some(finished_at) = inspect.finished_at else {
                continue;
            };
            assert!(
                inspect.created_at <= finished_at,
                "container creation time is after the time it finished: \
                 container='{}', created={}, finished={}",
                summary.id,
                inspect.created_at,
                finished_at
            );
            if finished_at > cutoff {
                // too young
                continue;
            }
            if latest_instances.contains(&summary.id) {
                // the latest known instance is never removed, even if it
                // was stopped ages ago - its record must always resolve
                warn!(
                    "not removing stopped container {} because it is the last known instance",
                    summary.id
                );
                continue;
            }
            removed.push(summary.id.clone());
            if options.simulate {
                info!("would remove old container {}", summary.id);
            } else {
                info!("removing old container {}", summary.id);
                if let Err(e) = self.runtime.remove_container(&summary.id) {
                    warn!("failed to remove container {}: {e:#}", summary.id);
                }
            }
        }
        Ok(removed)
    }

    /// Remove dangling images that no surviving container uses and that
    /// are older than the retention age. Returns the affected IDs.
    pub fn cleanup_images(
        &self,
        options: &CleanupOptions,
        simulated_removed_containers: &[String],
    ) -> Result<Vec<String>> {
        let images = self.runtime.list_images(false)?;
        let known_ids: HashSet<&str> = images.iter().map(|image| image.id.as_str()).collect();

        let mut used_image_ids: HashSet<String> = HashSet::new();
        for summary in self.runtime.list_containers(true)? {
            let Some(inspect) = self.runtime.inspect_container(&summary.id)? else {
                continue;
            };
            assert!(
                known_ids.contains(inspect.image_id.as_str()),
                "image {} does not exist, but is used by container {}",
                inspect.image_id,
                summary.id
            );
            if simulated_removed_containers.contains(&summary.id) {
                continue;
            }
            used_image_ids.insert(inspect.image_id);
        }

        let cutoff = Utc::now() - Duration::days(options.min_age_days);
        let mut removed = Vec::new();
        for image in self.runtime.list_images(true)? {
            assert!(
                image.tags.is_empty() || image.tags == ["<none>:<none>"],
                "engine listed image {} with tags {:?} as dangling",
                image.id,
                image.tags
            );
            if used_image_ids.contains(&image.id) {
                continue;
            }
            if image.created_at > cutoff {
                continue;
            }
            removed.push(image.id.clone());
            if options.simulate {
                info!("would delete unused old image {}", image.id);
            } else {
                info!("deleting unused old image {}", image.id);
                if let Err(e) = self.runtime.remove_image(&image.id) {
                    warn!("failed to remove unused image {}: {e:#}", image.id);
                }
            }
        }
        Ok(removed)
    }
}
