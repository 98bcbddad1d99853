use crate::domain::{ConfigGraph, Container, FleetError, Probe, RunOptions};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "fleetbox.toml";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".config/fleetbox"))
        .unwrap_or_else(|_| PathBuf::from("/etc/fleetbox"))
}

pub fn state_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("state")
}

fn default_sleep_before_probe() -> f64 {
    0.5
}

fn default_startup_grace() -> u64 {
    2
}

/// One `[[container]]` entry. The array-of-tables form keeps declaration
/// order, which the link invariant depends on.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerEntry {
    pub name: String,
    /// Defaults to `{name}:latest`.
    pub image: Option<String>,
    /// Build context directory, relative to the config directory unless
    /// absolute. Omit for containers that are never built here.
    pub path: Option<String>,
    #[serde(default)]
    pub only_build: bool,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, rename = "probe")]
    pub probes: Vec<Probe>,
    #[serde(default = "default_sleep_before_probe")]
    pub sleep_before_probe_secs: f64,
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,
    #[serde(default)]
    pub alias_tags: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub update_check: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FleetConfig {
    #[serde(default, rename = "container")]
    pub containers: Vec<ContainerEntry>,
}

pub fn load_graph(config_dir: &Path) -> Result<ConfigGraph> {
    let path = config_dir.join(CONFIG_FILE_NAME);
    let content =
        fs::read_to_string(&path).with_context(|| format!("reading configuration {path:?}"))?;
    let config: FleetConfig =
        toml::from_str(&content).with_context(|| format!("parsing {path:?}"))?;
    graph_from_config(config, config_dir)
}

pub fn graph_from_config(config: FleetConfig, config_dir: &Path) -> Result<ConfigGraph> {
    let mut containers = Vec::with_capacity(config.containers.len());
    for entry in config.containers {
        containers.push(container_from_entry(entry, config_dir)?);
    }
    debug!("loaded {} container(s) from configuration", containers.len());
    ConfigGraph::new(containers)
}

fn container_from_entry(entry: ContainerEntry, config_dir: &Path) -> Result<Container> {
    validate_name(&entry.name)?;

    let image = entry
        .image
        .unwrap_or_else(|| format!("{}:latest", entry.name));
    let path = entry
        .path
        .map(|raw| expand_path(&raw, config_dir))
        .transpose()?;
    let volumes = entry
        .volumes
        .iter()
        .map(|volume| expand_volume(volume))
        .collect::<Result<Vec<_>>>()?;

    Ok(Container {
        name: entry.name,
        image,
        path,
        only_build: entry.only_build,
        links: entry.links,
        probes: entry.probes,
        sleep_before_probe: Duration::from_secs_f64(entry.sleep_before_probe_secs),
        startup_grace: Duration::from_secs(entry.startup_grace_secs),
        alias_tags: entry.alias_tags,
        run_options: RunOptions {
            ports: entry.ports,
            env: entry.env,
            volumes,
            extra_args: entry.extra_args,
        },
        update_check: entry.update_check,
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FleetError::InvalidConfig("empty container name".to_string()).into());
    }
    let first = name.chars().next().unwrap();
    if !first.is_alphanumeric() {
        return Err(FleetError::InvalidConfig(format!(
            "container name '{name}' must start with a letter or digit"
        ))
        .into());
    }
    for c in name.chars() {
        if !c.is_alphanumeric() && c != '_' && c != '.' && c != '-' {
            return Err(FleetError::InvalidConfig(format!(
                "container name '{name}' contains invalid character '{c}'"
            ))
            .into());
        }
    }
    Ok(())
}

fn expand_path(raw: &str, config_dir: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(config_dir.join(path))
    }
}

/// Expand the host side of a `host:container[:options]` volume mapping.
fn expand_volume(raw: &str) -> Result<String> {
    match raw.split_once(':') {
        Some((host, rest)) => {
            let host = shellexpand::tilde(host);
            Ok(format!("{host}:{rest}"))
        }
        None => Ok(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<ConfigGraph> {
        let config: FleetConfig = toml::from_str(toml).unwrap();
        graph_from_config(config, Path::new("/etc/fleetbox"))
    }

    #[test]
    fn parses_ordered_containers_with_probes() {
        let graph = parse(
            r#"
[[container]]
name = "base"
path = "./base"
only_build = true

[[container]]
name = "db"
image = "postgres:15"
ports = ["5432:5432"]

[[container.probe]]
type = "tcp_port"
port = 5432

[[container]]
name = "web"
path = "./web"
links = ["db"]
sleep_before_probe_secs = 2.0
startup_grace_secs = 30

[[container.probe]]
type = "http"
url = "http://localhost/"
"#,
        )
        .unwrap();

        let names: Vec<&str> = graph.all().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["base", "db", "web"]);

        let base = graph.get("base").unwrap();
        assert!(base.only_build);
        assert_eq!(base.image, "base:latest");
        assert_eq!(base.path.as_deref(), Some(Path::new("/etc/fleetbox/base")));

        let db = graph.get("db").unwrap();
        assert_eq!(db.image, "postgres:15");
        assert_eq!(db.path, None);
        assert_eq!(db.probes.len(), 1);

        let web = graph.get("web").unwrap();
        assert_eq!(web.links, vec!["db"]);
        assert_eq!(web.startup_grace, Duration::from_secs(30));
        assert_eq!(web.sleep_before_probe, Duration::from_secs(2));
    }

    #[test]
    fn rejects_forward_link_in_file_order() {
        let result = parse(
            r#"
[[container]]
name = "web"
links = ["db"]

[[container]]
name = "db"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(parse("[[container]]\nname = \"-bad\"\n").is_err());
        assert!(parse("[[container]]\nname = \"has space\"\n").is_err());
        assert!(parse("[[container]]\nname = \"\"\n").is_err());
    }

    #[test]
    fn expands_home_in_volume_host_side() {
        // SAFETY: tests in this module do not race on HOME
        unsafe { std::env::set_var("HOME", "/home/op") };
        let graph = parse(
            r#"
[[container]]
name = "web"
volumes = ["~/webroot:/var/www:ro"]
"#,
        )
        .unwrap();
        assert_eq!(
            graph.get("web").unwrap().run_options.volumes,
            vec!["/home/op/webroot:/var/www:ro"]
        );
    }

    #[test]
    fn absolute_build_paths_are_kept() {
        let graph = parse(
            r#"
[[container]]
name = "web"
path = "/srv/build/web"
"#,
        )
        .unwrap();
        assert_eq!(
            graph.get("web").unwrap().path.as_deref(),
            Some(Path::new("/srv/build/web"))
        );
    }
}
