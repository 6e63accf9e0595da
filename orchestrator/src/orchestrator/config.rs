//! Flat configuration with explicit, enumerated fields, loaded from a
//! YAML file at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs::reader::{FileReader, ReadError};
use fs::LocalFile;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Read(#[from] ReadError),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Secret shared with the login flow that signs session tokens.
    pub jwt_secret: String,

    /// Exactly 32 bytes when set; absent means catalog secrets are stored
    /// unsealed (passthrough cipher).
    #[serde(default)]
    pub cipher_key: Option<String>,

    /// Public base URL, used to render webhook URLs in settings responses.
    #[serde(default)]
    pub app_url: Option<Url>,

    /// The user with this email gets the root bit (management-node access).
    #[serde(default)]
    pub root_email: Option<String>,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub log: LogSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub ssh: SshSettings,

    /// Budget for a single cloud-provider action.
    #[serde(
        default = "default_provider_deadline",
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub provider_deadline: Duration,
}

impl OrchestratorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = LocalFile.read(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/localisprod/localisprod.db")
}

fn default_provider_deadline() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_workers() -> usize {
    crate::http::server::DEFAULT_WORKERS
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerSettings {
    #[serde(
        default = "default_image_check_interval",
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub image_check_interval: Duration,
    #[serde(
        default = "default_health_check_interval",
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub health_check_interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            image_check_interval: default_image_check_interval(),
            health_check_interval: default_health_check_interval(),
        }
    }
}

fn default_image_check_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    #[serde(
        default = "default_ssh_connect_timeout",
        deserialize_with = "duration_str::deserialize_duration"
    )]
    pub connect_timeout: Duration,
    /// Verifying node host keys against the known-hosts file is on by
    /// default; turning it off is a deliberate decision.
    #[serde(default = "default_strict_host_keys")]
    pub strict_host_key_checking: bool,
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_ssh_connect_timeout(),
            strict_host_key_checking: default_strict_host_keys(),
            known_hosts_path: None,
        }
    }
}

fn default_ssh_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_strict_host_keys() -> bool {
    true
}
