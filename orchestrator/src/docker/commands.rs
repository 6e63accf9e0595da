//! Builders for the container-runtime commands the orchestrator issues.

use crate::catalog::entity::PortMapping;

use super::shell::quote;

/// `docker run` invocation under construction.
#[derive(Debug, Clone, Default)]
pub struct RunCommand {
    name: String,
    image: String,
    ports: Vec<PortMapping>,
    env_file: Option<String>,
    network: Option<String>,
    labels: Vec<(String, String)>,
    volumes: Vec<String>,
    restart: Option<String>,
    args: Vec<String>,
}

impl RunCommand {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Self::default()
        }
    }

    pub fn publish(mut self, ports: &[PortMapping]) -> Self {
        self.ports.extend_from_slice(ports);
        self
    }

    pub fn env_file(mut self, path: &str) -> Self {
        self.env_file = Some(path.to_string());
        self
    }

    pub fn network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// `host_path:container_path` bind or named-volume mounts.
    pub fn volumes(mut self, volumes: &[String]) -> Self {
        self.volumes.extend_from_slice(volumes);
        self
    }

    pub fn restart_policy(mut self, policy: &str) -> Self {
        self.restart = Some(policy.to_string());
        self
    }

    /// Trailing container command, tokenized on whitespace.
    pub fn command(mut self, command: &str) -> Self {
        self.args.extend(command.split_whitespace().map(String::from));
        self
    }

    /// Pre-tokenized trailing arguments; each one is quoted as a whole, so
    /// values with spaces stay a single token.
    pub fn args(mut self, args: &[String]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    pub fn build(self) -> String {
        let mut parts = vec![
            "docker run -d".to_string(),
            format!("--name {}", quote(&self.name)),
        ];
        for port in &self.ports {
            parts.push(format!("-p {}", quote(&port.to_string())));
        }
        if let Some(env_file) = &self.env_file {
            parts.push(format!("--env-file {}", quote(env_file)));
        }
        if let Some(network) = &self.network {
            parts.push(format!("--network {}", quote(network)));
        }
        for (key, value) in &self.labels {
            parts.push(format!("--label {}", quote(&format!("{key}={value}"))));
        }
        for volume in &self.volumes {
            parts.push(format!("-v {}", quote(volume)));
        }
        if let Some(restart) = &self.restart {
            parts.push(format!("--restart {}", quote(restart)));
        }
        parts.push(quote(&self.image));
        parts.extend(self.args.iter().map(|arg| quote(arg)));
        parts.join(" ")
    }
}

pub fn pull(image: &str) -> String {
    format!("docker pull {}", quote(image))
}

/// `rm` runs even when `stop` reports the container already gone, so the
/// command is safe to repeat.
pub fn stop_and_remove(name: &str) -> String {
    let name = quote(name);
    format!("docker stop {name} >/dev/null 2>&1; docker rm {name}")
}

pub fn stop(name: &str) -> String {
    format!("docker stop {}", quote(name))
}

pub fn start(name: &str) -> String {
    format!("docker start {}", quote(name))
}

pub fn restart(name: &str) -> String {
    format!("docker restart {}", quote(name))
}

pub fn logs_tail(name: &str, lines: u32) -> String {
    format!("docker logs --tail {lines} {}", quote(name))
}

pub fn inspect_status(name: &str) -> String {
    format!("docker inspect -f '{{{{.State.Status}}}}' {}", quote(name))
}

pub fn volume_create(name: &str) -> String {
    format!("docker volume create {} || true", quote(name))
}

pub fn network_create(name: &str) -> String {
    format!("docker network create {} 2>/dev/null || true", quote(name))
}

/// The token is fed to the command's stdin, never placed on the argv.
pub fn registry_login(registry: &str, username: &str) -> String {
    format!(
        "docker login {} -u {} --password-stdin",
        quote(registry),
        quote(username)
    )
}
