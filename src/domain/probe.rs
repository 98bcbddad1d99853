use super::ContainerRuntime;
use serde::Deserialize;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{error, warn};

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    2
}

/// Health probe run against a live container instance.
///
/// Probes never error: every I/O failure is a plain `false`. New probe
/// kinds are added by extending the variant list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Probe {
    /// TCP reachability; optionally requires the server to answer a
    /// greeting with at least one byte.
    TcpPort {
        port: u16,
        #[serde(default)]
        host: Option<String>,
        #[serde(default = "default_true")]
        expect_reply: bool,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// HTTP GET returning a success status.
    Http {
        url: String,
        #[serde(default = "default_true")]
        verify_tls: bool,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Shell command inside the live instance; exit code 0 passes.
    Shell {
        command: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Probe {
    /// Evaluate against the instance named `instance`, if one is live.
    pub fn run(&self, runtime: &dyn ContainerRuntime, instance: Option<&str>) -> bool {
        match self {
            Probe::TcpPort {
                port,
                host,
                expect_reply,
                timeout_secs,
            } => tcp_probe(
                host.as_deref().unwrap_or("localhost"),
                *port,
                *expect_reply,
                Duration::from_secs(*timeout_secs),
            ),
            Probe::Http {
                url,
                verify_tls,
                timeout_secs,
            } => http_probe(url, *verify_tls, Duration::from_secs(*timeout_secs)),
            Probe::Shell {
                command,
                timeout_secs,
            } => {
                let Some(instance) = instance else {
                    // nothing to exec into
                    return false;
                };
                match runtime.exec_batch(instance, command, Duration::from_secs(*timeout_secs)) {
                    Ok(0) => true,
                    Ok(code) => {
                        warn!("probe command '{command}' failed with exit code {code}");
                        false
                    }
                    Err(e) => {
                        error!("probe command '{command}' could not be run: {e:#}");
                        false
                    }
                }
            }
        }
    }
}

fn tcp_probe(host: &str, port: u16, expect_reply: bool, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(e) => {
            error!("cannot resolve TCP host {host}: {e}");
            return false;
        }
    };
    let Some(stream) = addrs
        .iter()
        .find_map(|addr| TcpStream::connect_timeout(addr, timeout).ok())
    else {
        error!("connection failed for TCP host {host} port {port}");
        return false;
    };
    if !expect_reply {
        return true;
    }
    if stream.set_read_timeout(Some(Duration::from_secs(1))).is_err()
        || stream.set_write_timeout(Some(Duration::from_secs(1))).is_err()
    {
        return false;
    }
    let mut stream = stream;
    let mut reply = [0u8; 1];
    let answered = stream.write_all(b"hello\n").is_ok()
        && matches!(stream.read(&mut reply), Ok(n) if n > 0);
    if !answered {
        error!(
            "no response from TCP host {host} port {port} - server dead or this \
             protocol doesn't answer to a simple 'hello' packet"
        );
    }
    answered
}

fn http_probe(url: &str, verify_tls: bool, timeout: Duration) -> bool {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!verify_tls)
        .build();
    let response = match client {
        Ok(client) => client.get(url).send(),
        Err(e) => {
            error!("cannot build HTTP client for {url}: {e}");
            return false;
        }
    };
    match response {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            error!("test failed for HTTP {url}: status {}", response.status());
            false
        }
        Err(e) => {
            error!("test failed for HTTP {url}: {e}");
            false
        }
    }
}
