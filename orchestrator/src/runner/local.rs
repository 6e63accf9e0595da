//! Command execution on the orchestrator host itself, used for the
//! management node and nodes registered with `is_local`.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use fs::writer::FileWriter;
use fs::LocalFile;

use super::{Runner, RunnerError};

#[derive(Debug, Default)]
pub struct LocalRunner {
    files: LocalFile,
}

fn collect(output: Output) -> Result<String, RunnerError> {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim_end().to_string();

    if output.status.success() {
        Ok(combined)
    } else {
        Err(RunnerError::Command {
            status: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

impl Runner for LocalRunner {
    fn run(&self, command: &str) -> Result<String, RunnerError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|err| RunnerError::Transport(err.to_string()))?;
        collect(output)
    }

    fn run_with_input(&self, command: &str, input: &str) -> Result<String, RunnerError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RunnerError::Transport(err.to_string()))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|err| RunnerError::Transport(err.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| RunnerError::Transport(err.to_string()))?;
        collect(output)
    }

    fn ping(&self) -> Result<(), RunnerError> {
        self.run("true").map(|_| ())
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<(), RunnerError> {
        self.files
            .write(
                Path::new(path),
                contents.to_string(),
                Permissions::from_mode(0o600),
            )
            .map_err(|err| RunnerError::FileWrite(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_combines_streams_and_trims() {
        let runner = LocalRunner::default();
        let output = runner.run("echo out; echo err >&2").unwrap();
        assert_eq!("out\nerr", output);
    }

    #[test]
    fn test_nonzero_exit_carries_output() {
        let runner = LocalRunner::default();
        let err = runner.run("echo broken >&2; exit 3").unwrap_err();
        match err {
            RunnerError::Command { status, output } => {
                assert_eq!(3, status);
                assert_eq!("broken", output);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_stdin_is_fed_to_the_command() {
        let runner = LocalRunner::default();
        let output = runner.run_with_input("cat", "token-value").unwrap();
        assert_eq!("token-value", output);
    }

    #[test]
    fn test_ping_succeeds_locally() {
        LocalRunner::default().ping().unwrap();
    }

    #[test]
    fn test_write_file_is_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        let runner = LocalRunner::default();

        runner
            .write_file(path.to_str().unwrap(), "A=1\n")
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(0o600, mode & 0o777);
        assert_eq!("A=1\n", std::fs::read_to_string(&path).unwrap());
    }

    #[test]
    fn test_port_probe_reports_free_port() {
        // Nothing should be listening on this high ephemeral port in CI.
        let runner = LocalRunner::default();
        assert!(!runner.is_port_in_use(59_999).unwrap());
    }
}
