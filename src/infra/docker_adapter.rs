use crate::domain::{
    ContainerInspect, ContainerRuntime, ContainerSummary, ImageSummary, RunSpec,
};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime gateway backed by the `docker` command-line client.
#[derive(Debug)]
pub struct DockerAdapter;

impl DockerAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available(&self) -> bool {
        Command::new("docker")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for DockerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for DockerAdapter {
    fn build_image(&self, path: &Path, image: &str, no_cache: bool) -> Result<()> {
        let mut args: Vec<String> = vec!["build".into()];
        if no_cache {
            args.push("--no-cache".into());
        }
        args.push("-t".into());
        args.push(image.into());
        args.push(path.to_string_lossy().into_owned());
        docker(args, &format!("building image {image} from {path:?}"))
    }

    fn tag_image(&self, image: &str, alias: &str) -> Result<()> {
        docker(["tag", image, alias], &format!("tagging {image} as {alias}"))
    }

    fn run_container(&self, spec: &RunSpec) -> Result<String> {
        let mut args: Vec<String> = vec!["run".into(), "-d".into(), "--name".into(), spec.name.into()];

        for (key, value) in spec.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        for (instance, alias) in spec.links {
            args.push(format!("--link={instance}:{alias}"));
        }
        for port in spec.ports {
            args.push("-p".into());
            args.push(port.clone());
        }
        for env in spec.env {
            args.push("-e".into());
            args.push(env.clone());
        }
        for volume in spec.volumes {
            args.push("-v".into());
            args.push(volume.clone());
        }
        for extra in spec.extra_args {
            args.push(extra.clone());
        }
        args.push(spec.image.into());

        let output = docker_output(args, &format!("starting container {}", spec.name))?;
        let id = output.trim();
        if id.is_empty() {
            bail!("docker run did not report a container id for {}", spec.name);
        }
        Ok(id.to_string())
    }

    fn stop_container(&self, id: &str) -> Result<()> {
        docker(["stop", id], &format!("stopping container {id}"))
    }

    fn remove_container(&self, id: &str) -> Result<()> {
        docker(["rm", id], &format!("removing container {id}"))
    }

    fn remove_image(&self, id: &str) -> Result<()> {
        docker(
            ["rmi", "--no-prune", id],
            &format!("removing image {id}"),
        )
    }

    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInspect>> {
        const FORMAT: &str =
            "{{.State.Running}}\t{{.Created}}\t{{.State.StartedAt}}\t{{.State.FinishedAt}}\t{{.Image}}";
        let output = Command::new("docker")
            .args(["inspect", "--format", FORMAT, id])
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("inspecting container {id}"))?;
        if !output.status.success() {
            debug!("container {id} not found by inspect");
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let fields: Vec<&str> = stdout.trim().split('\t').collect();
        if fields.len() != 5 {
            bail!("unexpected inspect output for container {id}: {stdout:?}");
        }
        let created_at = parse_engine_time(fields[1])
            .with_context(|| format!("container {id} has no parseable creation time"))?;
        Ok(Some(ContainerInspect {
            running: fields[0] == "true",
            created_at,
            started_at: parse_engine_time(fields[2]),
            finished_at: parse_engine_time(fields[3]),
            image_id: fields[4].to_string(),
        }))
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let status = Command::new("docker")
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("checking for image {image}"))?;
        Ok(status.success())
    }

    fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "--no-trunc"];
        if all {
            args.push("-a");
        }
        args.extend(["--format", "{{.ID}}\t{{.Image}}\t{{.Labels}}"]);
        let output = docker_output(args, "listing containers")?;

        let mut containers = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.splitn(3, '\t').collect();
            if fields.len() < 2 {
                bail!("unexpected container listing line: {line:?}");
            }
            containers.push(ContainerSummary {
                id: fields[0].to_string(),
                image: fields[1].to_string(),
                labels: parse_labels(fields.get(2).copied().unwrap_or("")),
            });
        }
        Ok(containers)
    }

    fn list_images(&self, dangling_only: bool) -> Result<Vec<ImageSummary>> {
        let mut args = vec!["images", "-q", "--no-trunc"];
        if dangling_only {
            args.extend(["--filter", "dangling=true"]);
        }
        let output = docker_output(args, "listing images")?;

        let mut ids: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut images = Vec::with_capacity(ids.len());
        for id in ids {
            let detail = docker_output(
                ["image", "inspect", "--format", "{{.Created}}\t{{json .RepoTags}}", id],
                &format!("inspecting image {id}"),
            )?;
            let (created, tags_json) = detail
                .trim()
                .split_once('\t')
                .with_context(|| format!("unexpected image inspect output for {id}"))?;
            let tags: Vec<String> = serde_json::from_str(tags_json)
                .with_context(|| format!("parsing tags of image {id}"))?;
            let created_at = parse_engine_time(created)
                .with_context(|| format!("image {id} has no parseable creation time"))?;
            images.push(ImageSummary {
                id: id.to_string(),
                tags,
                created_at,
            });
        }
        Ok(images)
    }

    fn logs(&self, id: &str, follow: bool, tail: usize) -> Result<()> {
        let tail = tail.to_string();
        let mut args = vec!["logs", "--tail", tail.as_str()];
        if follow {
            args.push("--follow");
        }
        args.push(id);
        docker(args, &format!("fetching logs of {id}"))
    }

    fn exec_batch(&self, id: &str, command: &str, timeout: Duration) -> Result<i32> {
        // `timeout` runs inside the instance, so the probe deadline holds
        // even when the contained process ignores signals from outside
        let status = docker_status(
            [
                "exec",
                id,
                "timeout",
                &timeout.as_secs().to_string(),
                "bash",
                "-c",
                command,
            ],
            &format!("running '{command}' in {id}"),
        )?;
        Ok(status.code().unwrap_or(-1))
    }

    fn exec_interactive(&self, id: &str, command: &str) -> Result<()> {
        docker(
            ["exec", "-it", id, command],
            &format!("opening interactive '{command}' in {id}"),
        )
    }

    fn run_batch(&self, image: &str, command: &str) -> Result<String> {
        docker_output(
            ["run", "--rm", image, "bash", "-c", command],
            &format!("running '{command}' in a new instance of {image}"),
        )
    }

    fn run_interactive(
        &self,
        image: &str,
        command: &str,
        labels: &[(String, String)],
    ) -> Result<()> {
        let mut args: Vec<String> = vec!["run".into(), "-it".into(), "--rm".into()];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        args.push(image.into());
        args.push(command.into());
        docker(args, &format!("starting a new interactive instance of {image}"))
    }
}

fn parse_labels(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// Engine timestamps are RFC 3339; the zero time stands for "never".
fn parse_engine_time(raw: &str) -> Option<DateTime<Utc>> {
    use chrono::Datelike;

    let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let parsed = parsed.with_timezone(&Utc);
    // docker reports 0001-01-01T00:00:00Z for unset times
    if parsed.year() <= 1 {
        return None;
    }
    Some(parsed)
}

fn docker<I, S>(args: I, context: &str) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let status = docker_status(args, context)?;
    ensure_success(status, context)
}

fn docker_status<I, S>(args: I, context: &str) -> Result<ExitStatus>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new("docker")
        .args(args.into_iter().map(|item| item.as_ref().to_os_string()))
        .status()
        .with_context(|| context.to_string())
}

fn docker_output<I, S>(args: I, context: &str) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new("docker")
        .args(args.into_iter().map(|item| item.as_ref().to_os_string()))
        .output()
        .with_context(|| context.to_string())?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("docker stderr: {}", stderr.trim());
        bail!("docker returned status {:?} ({context})", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn ensure_success(status: ExitStatus, context: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    bail!("docker returned status {status:?} ({context})")
}
