//! Remote execution over SSH.
//!
//! Each call dials the node, authenticates with its stored key and opens
//! one session per command. Files are written through SFTP with mode 0600.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{CheckResult, KnownHostFileKind, OpenFlags, OpenType, Session};
use tracing::debug;

use crate::catalog::entity::Node;

use super::{Runner, RunnerError, SshOptions};

pub struct SshRunner {
    host: String,
    port: u16,
    username: String,
    private_key: String,
    options: SshOptions,
}

fn transport(err: impl std::fmt::Display) -> RunnerError {
    RunnerError::Transport(err.to_string())
}

impl SshRunner {
    pub fn new(node: &Node, options: SshOptions) -> Self {
        Self {
            host: node.host.clone(),
            port: node.port,
            username: node.username.clone(),
            private_key: node.private_key.clone(),
            options,
        }
    }

    fn connect(&self) -> Result<Session, RunnerError> {
        let address = format!("{}:{}", self.host, self.port)
            .to_socket_addrs()
            .map_err(transport)?
            .next()
            .ok_or_else(|| RunnerError::Transport(format!("no address for {}", self.host)))?;
        let stream = TcpStream::connect_timeout(&address, self.options.connect_timeout)
            .map_err(transport)?;

        let mut session = Session::new().map_err(transport)?;
        session.set_tcp_stream(stream);
        session.handshake().map_err(transport)?;

        if self.options.strict_host_key_checking {
            self.verify_host_key(&session)?;
        } else {
            debug!(host = %self.host, "host key verification disabled by configuration");
        }

        session
            .userauth_pubkey_memory(&self.username, None, &self.private_key, None)
            .map_err(transport)?;
        Ok(session)
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), RunnerError> {
        let (key, _) = session
            .host_key()
            .ok_or_else(|| RunnerError::HostKey(self.host.clone()))?;
        let mut known_hosts = session.known_hosts().map_err(transport)?;
        known_hosts
            .read_file(&self.options.known_hosts_path, KnownHostFileKind::OpenSSH)
            .map_err(|err| {
                RunnerError::HostKey(format!(
                    "{}: cannot read {}: {err}",
                    self.host,
                    self.options.known_hosts_path.display()
                ))
            })?;
        match known_hosts.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            _ => Err(RunnerError::HostKey(self.host.clone())),
        }
    }

    fn exec(&self, command: &str, input: Option<&str>) -> Result<String, RunnerError> {
        let session = self.connect()?;
        let mut channel = session.channel_session().map_err(transport)?;
        channel.exec(command).map_err(transport)?;

        if let Some(input) = input {
            channel.write_all(input.as_bytes()).map_err(transport)?;
            channel.send_eof().map_err(transport)?;
        }

        let mut output = String::new();
        channel.read_to_string(&mut output).map_err(transport)?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(transport)?;
        output.push_str(&stderr);

        channel.wait_close().map_err(transport)?;
        let status = channel.exit_status().map_err(transport)?;
        let output = output.trim_end().to_string();

        if status == 0 {
            Ok(output)
        } else {
            Err(RunnerError::Command { status, output })
        }
    }
}

impl Runner for SshRunner {
    fn run(&self, command: &str) -> Result<String, RunnerError> {
        self.exec(command, None)
    }

    fn run_with_input(&self, command: &str, input: &str) -> Result<String, RunnerError> {
        self.exec(command, Some(input))
    }

    fn ping(&self) -> Result<(), RunnerError> {
        self.run("true").map(|_| ())
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<(), RunnerError> {
        let session = self.connect()?;
        let sftp = session
            .sftp()
            .map_err(|err| RunnerError::FileWrite(err.to_string()))?;
        let mut file = sftp
            .open_mode(
                Path::new(path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o600,
                OpenType::File,
            )
            .map_err(|err| RunnerError::FileWrite(err.to_string()))?;
        file.write_all(contents.as_bytes())
            .map_err(|err| RunnerError::FileWrite(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entity::NodeStatus;
    use chrono::Utc;
    use std::time::Duration;

    fn unreachable_node() -> Node {
        Node {
            id: "n1".into(),
            user_id: Some("u1".into()),
            name: "web-1".into(),
            // TEST-NET-1; nothing routable listens here.
            host: "192.0.2.1".into(),
            port: 22,
            username: "root".into(),
            private_key: "key".into(),
            status: NodeStatus::Unknown,
            is_local: false,
            traefik_enabled: false,
            provider: None,
            provider_region: None,
            provider_instance_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_dial_failure_is_transient_transport_error() {
        let options = SshOptions {
            connect_timeout: Duration::from_millis(50),
            ..SshOptions::default()
        };
        let runner = SshRunner::new(&unreachable_node(), options);
        let err = runner.run("true").unwrap_err();
        assert!(err.is_transient());
    }
}
