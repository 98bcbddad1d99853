use crate::domain::traits::StateStore;
use crate::domain::{
    ConfigGraph, Container, ContainerInspect, ContainerRuntime, ContainerSummary, ImageSummary,
    RunOptions, RunSpec,
};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Build a validated graph of plain containers for tests.
pub fn test_graph(entries: &[(&str, &[&str])]) -> ConfigGraph {
    test_graph_with(
        &entries
            .iter()
            .map(|(name, links)| (*name, *links, false))
            .collect::<Vec<_>>(),
    )
}

pub fn test_graph_with(entries: &[(&str, &[&str], bool)]) -> ConfigGraph {
    let containers = entries
        .iter()
        .map(|(name, links, only_build)| Container {
            name: name.to_string(),
            image: format!("{name}:latest"),
            path: Some(PathBuf::from(format!("./{name}"))),
            only_build: *only_build,
            links: links.iter().map(|l| l.to_string()).collect(),
            probes: Vec::new(),
            sleep_before_probe: Duration::ZERO,
            startup_grace: Duration::from_secs(2),
            alias_tags: Vec::new(),
            run_options: RunOptions::default(),
            update_check: None,
        })
        .collect();
    ConfigGraph::new(containers).expect("test graph must be valid")
}

#[derive(Debug, Clone)]
pub struct MockInstance {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
    pub links: Vec<(String, String)>,
}

/// In-memory runtime gateway that records every call it receives.
#[derive(Debug)]
pub struct MockRuntime {
    images_by_ref: RwLock<HashMap<String, String>>,
    image_meta: RwLock<BTreeMap<String, (Vec<String>, DateTime<Utc>)>>,
    instances: RwLock<Vec<MockInstance>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    exec_exit_codes: RwLock<HashMap<String, i32>>,
    run_batch_outputs: RwLock<HashMap<String, String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            images_by_ref: RwLock::new(HashMap::new()),
            image_meta: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(Vec::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            exec_exit_codes: RwLock::new(HashMap::new()),
            run_batch_outputs: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_image(&self, image: &str) {
        let id = format!("img-{image}");
        self.images_by_ref
            .write()
            .unwrap()
            .insert(image.to_string(), id.clone());
        self.image_meta
            .write()
            .unwrap()
            .insert(id, (vec![image.to_string()], Utc::now()));
    }

    pub fn add_image_full(&self, id: &str, tags: &[&str], created_at: DateTime<Utc>) {
        for tag in tags {
            self.images_by_ref
                .write()
                .unwrap()
                .insert(tag.to_string(), id.to_string());
        }
        self.image_meta.write().unwrap().insert(
            id.to_string(),
            (tags.iter().map(|t| t.to_string()).collect(), created_at),
        );
    }

    fn image_id_for_ref(&self, image: &str) -> String {
        self.images_by_ref
            .read()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_else(|| format!("img-{image}"))
    }

    fn push_instance(&self, instance: MockInstance) {
        self.instances.write().unwrap().push(instance);
    }

    pub fn add_running_instance(&self, name: &str, id: &str, image: &str) {
        self.add_running_instance_with_labels(name, id, image, &[]);
    }

    pub fn add_running_instance_with_labels(
        &self,
        name: &str,
        id: &str,
        image: &str,
        labels: &[(&str, &str)],
    ) {
        self.push_instance(MockInstance {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: self.image_id_for_ref(image),
            running: true,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            links: Vec::new(),
        });
    }

    pub fn add_stopped_instance(
        &self,
        name: &str,
        id: &str,
        image: &str,
        created_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        self.push_instance(MockInstance {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: self.image_id_for_ref(image),
            running: false,
            created_at,
            started_at: Some(created_at),
            finished_at: Some(finished_at),
            labels: HashMap::new(),
            links: Vec::new(),
        });
    }

    pub fn add_stopped_instance_from_image_id(
        &self,
        name: &str,
        id: &str,
        image_id: &str,
        created_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) {
        self.push_instance(MockInstance {
            id: id.to_string(),
            name: name.to_string(),
            image: image_id.to_string(),
            image_id: image_id.to_string(),
            running: false,
            created_at,
            started_at: Some(created_at),
            finished_at: Some(finished_at),
            labels: HashMap::new(),
            links: Vec::new(),
        });
    }

    pub fn add_never_finished_instance(
        &self,
        name: &str,
        id: &str,
        image: &str,
        created_at: DateTime<Utc>,
    ) {
        self.push_instance(MockInstance {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: self.image_id_for_ref(image),
            running: false,
            created_at,
            started_at: None,
            finished_at: None,
            labels: HashMap::new(),
            links: Vec::new(),
        });
    }

    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn set_exec_exit_code(&self, instance: &str, code: i32) {
        self.exec_exit_codes
            .write()
            .unwrap()
            .insert(instance.to_string(), code);
    }

    pub fn set_run_batch_output(&self, image: &str, output: &str) {
        self.run_batch_outputs
            .write()
            .unwrap()
            .insert(image.to_string(), output.to_string());
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn get_instance_by_prefix(&self, prefix: &str) -> Option<MockInstance> {
        self.instances
            .read()
            .unwrap()
            .iter()
            .find(|i| i.name.starts_with(prefix))
            .cloned()
    }

    pub fn instance_running(&self, name_prefix: &str) -> Option<bool> {
        self.get_instance_by_prefix(name_prefix).map(|i| i.running)
    }

    fn record_command(&self, command: &str) {
        self.commands.write().unwrap().push(command.to_string());
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                bail!("mock failure on: {operation}");
            }
        }
        Ok(())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for MockRuntime {
    fn build_image(&self, _path: &Path, image: &str, _no_cache: bool) -> Result<()> {
        self.record_command(&format!("build:{image}"));
        self.check_fail("build")?;
        self.add_image(image);
        Ok(())
    }

    fn tag_image(&self, image: &str, alias: &str) -> Result<()> {
        self.record_command(&format!("tag:{image}:{alias}"));
        self.check_fail("tag")?;
        let id = self.image_id_for_ref(image);
        self.images_by_ref
            .write()
            .unwrap()
            .insert(alias.to_string(), id);
        Ok(())
    }

    fn run_container(&self, spec: &RunSpec) -> Result<String> {
        self.record_command(&format!("run:{}", spec.name));
        self.check_fail("run")?;

        let id = format!("id-{}", spec.name);
        self.push_instance(MockInstance {
            id: id.clone(),
            name: spec.name.to_string(),
            image: spec.image.to_string(),
            image_id: self.image_id_for_ref(spec.image),
            running: true,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            labels: spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            links: spec.links.to_vec(),
        });
        Ok(id)
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("stop:{id}"));
        self.check_fail("stop")?;

        let mut instances = self.instances.write().unwrap();
        if let Some(instance) = instances.iter_mut().find(|i| i.id == id || i.name == id) {
            instance.running = false;
            instance.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        self.record_command(&format!("remove_container:{id}"));
        self.check_fail("remove_container")?;

        self.instances
            .write()
            .unwrap()
            .retain(|i| i.id != id && i.name != id);
        Ok(())
    }

    fn remove_image(&self, id: &str) -> Result<()> {
        self.record_command(&format!("remove_image:{id}"));
        self.check_fail("remove_image")?;

        self.image_meta.write().unwrap().remove(id);
        self.images_by_ref.write().unwrap().retain(|_, v| *v != id);
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInspect>> {
        self.check_fail("inspect")?;

        Ok(self
            .instances
            .read()
            .unwrap()
            .iter()
            .find(|i| i.id == id || i.name == id)
            .map(|i| ContainerInspect {
                running: i.running,
                created_at: i.created_at,
                started_at: i.started_at,
                finished_at: i.finished_at,
                image_id: i.image_id.clone(),
            }))
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        self.check_fail("image_exists")?;
        Ok(self.images_by_ref.read().unwrap().contains_key(image))
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        self.check_fail("list_containers")?;

        Ok(self
            .instances
            .read()
            .unwrap()
            .iter()
            .filter(|i| all || i.running)
            .map(|i| ContainerSummary {
                id: i.id.clone(),
                image: i.image.clone(),
                labels: i.labels.clone(),
            })
            .collect())
    }

    fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageSummary>> {
        self.check_fail("list_images")?;

        Ok(self
            .image_meta
            .read()
            .unwrap()
            .iter()
            .filter(|(_, (tags, _))| !dangling_only || tags.is_empty())
            .map(|(id, (tags, created_at))| ImageSummary {
                id: id.clone(),
                tags: tags.clone(),
                created_at: *created_at,
            })
            .collect())
    }

    fn logs(&self, id: &str, follow: bool, _tail: usize) -> Result<()> {
        self.record_command(&format!("logs:{id}:follow={follow}"));
        self.check_fail("logs")?;
        Ok(())
    }

    fn exec_batch(&self, id: &str, command: &str, _timeout: Duration) -> Result<i32> {
        self.record_command(&format!("exec:{id}:{command}"));
        self.check_fail("exec")?;
        Ok(self
            .exec_exit_codes
            .read()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0))
    }

    fn exec_interactive(&self, id: &str, command: &str) -> Result<()> {
        self.record_command(&format!("exec_interactive:{id}:{command}"));
        self.check_fail("exec_interactive")?;
        Ok(())
    }

    fn run_batch(&self, image: &str, command: &str) -> Result<String> {
        self.record_command(&format!("run_batch:{image}:{command}"));
        self.check_fail("run_batch")?;
        Ok(self
            .run_batch_outputs
            .read()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }

    fn run_interactive(
        &self,
        image: &str,
        command: &str,
        _labels: &[(String, String)],
    ) -> Result<()> {
        self.record_command(&format!("run_interactive:{image}:{command}"));
        self.check_fail("run_interactive")?;
        Ok(())
    }
}

/// In-memory [`StateStore`] for orchestrator tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<String, (String, String)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn instance_name(&self, container: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(container)
            .map(|(name, _)| name.clone()))
    }

    fn instance_id(&self, container: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(container)
            .map(|(_, id)| id.clone()))
    }

    fn record_instance(
        &self,
        container: &str,
        instance_name: &str,
        instance_id: &str,
    ) -> Result<()> {
        self.records.write().unwrap().insert(
            container.to_string(),
            (instance_name.to_string(), instance_id.to_string()),
        );
        Ok(())
    }
}
