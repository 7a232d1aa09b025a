//! Database freeze/thaw over a remote command channel.
//!
//! Neither call retries. A repeated freeze or thaw must be recognised as a no-op
//! by the guest tooling; the orchestrator owns the bounded thaw retry.
//!
//! Only a command that ran to completion with a non-zero exit is a rejection.
//! A dropped connection or a lost child process leaves the guest state unknown
//! and is returned as-is.

use crate::adapters::runner::CommandRunner;
use crate::error::{Result, VgsnapError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Guest-level I/O quiesce and resume.
#[async_trait]
pub trait GuestFreeze: Send + Sync {
    /// Quiesce database I/O. `Ok` is the guest's acknowledgement.
    async fn freeze(&self, environment: &str) -> Result<()>;

    /// Resume database I/O.
    async fn thaw(&self, environment: &str) -> Result<()>;
}

/// Runs configured freeze/thaw shell commands on the database host.
pub struct ShellGuestFreeze {
    runner: Arc<dyn CommandRunner>,
    freeze_command: String,
    thaw_command: String,
    timeout: Duration,
}

impl ShellGuestFreeze {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        freeze_command: impl Into<String>,
        thaw_command: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            freeze_command: freeze_command.into(),
            thaw_command: thaw_command.into(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `Ok(Err(stderr))` when the command ran and exited non-zero.
    async fn invoke(&self, command: &str) -> Result<std::result::Result<(), String>> {
        let args = vec!["-c".to_string(), command.to_string()];
        let output = self.runner.run("sh", &args, self.timeout).await?;
        if output.is_success() {
            Ok(Ok(()))
        } else {
            Ok(Err(output.error_text()))
        }
    }
}

#[async_trait]
impl GuestFreeze for ShellGuestFreeze {
    #[instrument(skip(self))]
    async fn freeze(&self, environment: &str) -> Result<()> {
        match self.invoke(&self.freeze_command).await {
            Ok(Ok(())) => {
                info!(host = self.runner.target(), "Database frozen");
                Ok(())
            }
            Ok(Err(reason)) => {
                warn!(%reason, "Freeze rejected");
                Err(VgsnapError::FreezeFailed { environment: environment.to_string(), reason })
            }
            Err(VgsnapError::Timeout { seconds, .. }) => {
                Err(VgsnapError::Timeout { operation: "freeze".to_string(), seconds })
            }
            Err(e) => {
                warn!(error = %e, "Freeze outcome unknown");
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    async fn thaw(&self, environment: &str) -> Result<()> {
        match self.invoke(&self.thaw_command).await {
            Ok(Ok(())) => {
                info!(host = self.runner.target(), "Database thawed");
                Ok(())
            }
            Ok(Err(reason)) => {
                Err(VgsnapError::ThawFailed { environment: environment.to_string(), reason })
            }
            Err(VgsnapError::Timeout { seconds, .. }) => {
                Err(VgsnapError::Timeout { operation: "thaw".to_string(), seconds })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runner::testing::ScriptedRunner;
    use crate::adapters::runner::CommandOutput;

    fn guest(runner: ScriptedRunner) -> (Arc<ScriptedRunner>, ShellGuestFreeze) {
        let runner = Arc::new(runner);
        let guest = ShellGuestFreeze::new(
            runner.clone(),
            "db2 set write suspend for database",
            "db2 set write resume for database",
        );
        (runner, guest)
    }

    #[tokio::test]
    async fn test_freeze_and_thaw_run_configured_commands() {
        let (runner, guest) = guest(ScriptedRunner::new());

        guest.freeze("prd").await.unwrap();
        guest.thaw("prd").await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "sh -c db2 set write suspend for database",
                "sh -c db2 set write resume for database",
            ]
        );
    }

    #[tokio::test]
    async fn test_freeze_rejection_is_typed() {
        let runner = ScriptedRunner::new()
            .on("suspend", vec![CommandOutput::failure(4, "SQL1035N database in use")]);
        let (_, guest) = guest(runner);

        let err = guest.freeze("prd").await.unwrap_err();
        assert!(matches!(err, VgsnapError::FreezeFailed { ref reason, .. }
            if reason == "SQL1035N database in use"));
    }

    #[tokio::test]
    async fn test_thaw_failure_is_typed() {
        let runner = ScriptedRunner::new().on("resume", vec![CommandOutput::failure(1, "no")]);
        let (_, guest) = guest(runner);

        assert!(matches!(guest.thaw("prd").await, Err(VgsnapError::ThawFailed { .. })));
    }

    #[tokio::test]
    async fn test_dropped_connection_is_not_a_rejection() {
        let runner = ScriptedRunner::new().fail_on("suspend", || VgsnapError::Transient {
            operation: "sh".to_string(),
            message: "ssh to db-prd failed: Connection to db-prd closed by remote host.".to_string(),
        });
        let (_, guest) = guest(runner);

        let err = guest.freeze("prd").await.unwrap_err();
        assert!(matches!(err, VgsnapError::Transient { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_lost_child_is_not_a_rejection() {
        let runner = ScriptedRunner::new().fail_on("suspend", || VgsnapError::CommandFailed {
            program: "sh".to_string(),
            reason: "broken pipe".to_string(),
        });
        let (_, guest) = guest(runner);

        let err = guest.freeze("prd").await.unwrap_err();
        assert!(matches!(err, VgsnapError::CommandFailed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_freeze_timeout_names_the_operation() {
        let runner = ScriptedRunner::new()
            .fail_on("suspend", || VgsnapError::Timeout { operation: "sh".to_string(), seconds: 15 });
        let (_, guest) = guest(runner);

        let err = guest.freeze("prd").await.unwrap_err();
        assert!(matches!(err, VgsnapError::Timeout { ref operation, seconds: 15 } if operation == "freeze"));
    }
}
