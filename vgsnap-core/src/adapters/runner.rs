//! Command execution, locally or on a remote host over SSH.
//!
//! Every collaborator adapter funnels its remote and local calls through a
//! [`CommandRunner`], which makes the adapters testable with a scripted runner.

use crate::error::{Result, VgsnapError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

/// SSH exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { status: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self { status: Some(status), stdout: String::new(), stderr: stderr.into() }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best human-readable error text: stderr, falling back to stdout.
    #[must_use]
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs a program with arguments and waits for it, bounded by `timeout`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;

    /// Where commands run (for logging).
    fn target(&self) -> &str;
}

/// Runs commands on this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    #[instrument(skip(self, args), fields(host = "local"))]
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        debug!(?args, "Running command");
        let mut cmd = Command::new(program);
        cmd.args(args);
        execute(cmd, program, timeout).await
    }

    fn target(&self) -> &str {
        "local"
    }
}

/// Runs commands on a remote host through non-interactive `ssh`.
#[derive(Debug, Clone)]
pub struct SshRunner {
    destination: String,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshRunner {
    pub fn new(host: &str, user: Option<&str>, identity_file: Option<PathBuf>) -> Self {
        let destination = match user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };
        Self { destination, identity_file, connect_timeout: Duration::from_secs(10) }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Arguments passed to `ssh` for running `program args...` remotely.
    fn ssh_args(&self, program: &str, args: &[String]) -> Vec<String> {
        let mut ssh_args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(identity) = &self.identity_file {
            ssh_args.push("-i".to_string());
            ssh_args.push(identity.to_string_lossy().to_string());
        }
        ssh_args.push(self.destination.clone());
        ssh_args.push("--".to_string());
        ssh_args.push(program.to_string());
        ssh_args.extend(args.iter().map(|arg| shell_quote(arg)));
        ssh_args
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    #[instrument(skip(self, args), fields(host = %self.destination))]
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        debug!(?args, "Running remote command");
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(program, args));
        let output = execute(cmd, program, timeout).await?;

        if output.status == Some(SSH_CONNECTION_FAILURE) {
            return Err(VgsnapError::Transient {
                operation: program.to_string(),
                message: format!("ssh to {} failed: {}", self.destination, output.error_text()),
            });
        }
        Ok(output)
    }

    fn target(&self) -> &str {
        &self.destination
    }
}

async fn execute(mut cmd: Command, program: &str, timeout: Duration) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| VgsnapError::CommandFailed {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| VgsnapError::Timeout {
            operation: program.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| VgsnapError::CommandFailed {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Quote an argument for the remote shell that `ssh` hands the command line to.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.bytes().all(|b| b.is_ascii_alphanumeric() || b"-_./=:,@%+".contains(&b));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Runner that answers from canned outputs and records every command line.
    ///
    /// A rule matches when the joined command line contains its pattern; the
    /// rule's outputs are consumed in order and the last one repeats.
    type ErrorFn = Box<dyn Fn() -> VgsnapError + Send + Sync>;

    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        rules: Mutex<Vec<(String, Vec<CommandOutput>)>>,
        failures: Mutex<Vec<(String, ErrorFn)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn on(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
            self.rules.lock().unwrap().push((pattern.to_string(), outputs));
            self
        }

        /// Fail every command line containing `pattern` with a fresh error.
        pub(crate) fn fail_on(
            self,
            pattern: &str,
            error: impl Fn() -> VgsnapError + Send + Sync + 'static,
        ) -> Self {
            self.failures.lock().unwrap().push((pattern.to_string(), Box::new(error)));
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> Result<CommandOutput> {
            let line = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            for (pattern, error) in self.failures.lock().unwrap().iter() {
                if line.contains(pattern.as_str()) {
                    return Err(error());
                }
            }

            let mut rules = self.rules.lock().unwrap();
            for (pattern, outputs) in rules.iter_mut() {
                if line.contains(pattern.as_str()) {
                    return Ok(if outputs.len() > 1 {
                        outputs.remove(0)
                    } else {
                        outputs.first().cloned().unwrap_or_default()
                    });
                }
            }
            Ok(CommandOutput::success(""))
        }

        fn target(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("vg.list"), "vg.list");
        assert_eq!(shell_quote("clone_from_vmdisk=ab-12"), "clone_from_vmdisk=ab-12");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_ssh_args() {
        let runner = SshRunner::new("cvm01", Some("admin"), Some(PathBuf::from("/etc/vgsnap/id")))
            .with_connect_timeout(Duration::from_secs(5));
        let args = runner.ssh_args("acli", &["-o".to_string(), "json".to_string()]);
        assert_eq!(
            args,
            vec![
                "-o", "BatchMode=yes", "-o", "ConnectTimeout=5", "-i", "/etc/vgsnap/id",
                "admin@cvm01", "--", "acli", "-o", "json",
            ]
        );
        assert_eq!(runner.target(), "admin@cvm01");
    }

    #[test]
    fn test_error_text_prefers_stderr() {
        assert_eq!(CommandOutput::failure(1, " boom \n").error_text(), "boom");
        let out = CommandOutput { status: Some(1), stdout: "from stdout".into(), stderr: "".into() };
        assert_eq!(out.error_text(), "from stdout");
    }

    #[tokio::test]
    async fn test_local_runner_captures_output() {
        let out = LocalRunner
            .run("sh", &["-c".to_string(), "echo hi; exit 3".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_local_runner_times_out() {
        let err = LocalRunner
            .run("sleep", &["5".to_string()], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, VgsnapError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = LocalRunner
            .run("vgsnap-definitely-missing", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VgsnapError::CommandFailed { .. }));
    }
}
