//! Uniform command execution on a node, local or remote.
//!
//! Every command a runner executes is pre-built by the [`crate::docker`]
//! module, so user-supplied values are already escaped by the time they
//! get here. Runners capture combined stdout+stderr and trim trailing
//! whitespace; a non-zero exit carries the captured output in the error.

pub mod factory;
pub mod local;
pub mod ssh;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// Dial, auth or session-level failure. The reconciler treats these as
    /// transient and leaves catalog statuses untouched.
    #[error("could not reach node: {0}")]
    Transport(String),

    #[error("host key verification failed for `{0}`")]
    HostKey(String),

    #[error("command exited with status {status}: {output}")]
    Command { status: i32, output: String },

    #[error("file write on target failed: {0}")]
    FileWrite(String),
}

impl RunnerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RunnerError::Transport(_))
    }

    /// Captured command output, when the failure produced any.
    pub fn output(&self) -> Option<&str> {
        match self {
            RunnerError::Command { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// How SSH runners dial and verify nodes. Host-key checking is on by
/// default; turning it off is an explicit configuration decision.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub strict_host_key_checking: bool,
    pub known_hosts_path: PathBuf,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            strict_host_key_checking: true,
            known_hosts_path: default_known_hosts_path(),
        }
    }
}

fn default_known_hosts_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".ssh/known_hosts")
}

#[cfg_attr(test, mockall::automock)]
pub trait Runner: Send + Sync {
    /// Executes `command` via the target's shell, returning combined
    /// stdout+stderr with trailing whitespace trimmed.
    fn run(&self, command: &str) -> Result<String, RunnerError>;

    /// Like [`Runner::run`], feeding `input` to the command's stdin. Used
    /// for registry logins so tokens never appear on an argv.
    fn run_with_input(&self, command: &str, input: &str) -> Result<String, RunnerError>;

    /// Trivial reachability probe.
    fn ping(&self) -> Result<(), RunnerError>;

    /// Writes a short file on the target with mode 0600.
    fn write_file(&self, path: &str, contents: &str) -> Result<(), RunnerError>;

    /// Asks the target whether a listener occupies `port`. Used at resource
    /// create time to narrow the window between the catalog check and the
    /// actual bind.
    fn is_port_in_use(&self, port: u16) -> Result<bool, RunnerError> {
        match self.run(&port_probe_command(port)) {
            Ok(_) => Ok(true),
            Err(RunnerError::Command { status: 1, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Exit-status-only probe of the host listen set; `ss` with a `netstat`
/// fallback for older targets.
fn port_probe_command(port: u16) -> String {
    format!(
        "(ss -ltn 2>/dev/null || netstat -ltn 2>/dev/null) \
         | grep -E -q '[:.]{port}([[:space:]]|$)'"
    )
}
