//! Ready signal for the downstream backup trigger.
//!
//! A run ends once its [`ReadyEvent`] has been handed to a [`ReadySink`]; the
//! orchestrator never waits for the backup job itself.
//!
//! # Example
//!
//! ```ignore
//! let (sink, mut rx) = ChannelSink::new(1);
//! // ... run the orchestrator with `sink` ...
//! while let Some(event) = rx.recv().await {
//!     println!("{} mounted at {}", event.clone_identifier, event.mount_path.display());
//! }
//! ```

use crate::error::{Result, VgsnapError};
use crate::types::CloneIdentifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

/// A mounted clone, ready to be backed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyEvent {
    pub clone_identifier: CloneIdentifier,
    pub mount_path: PathBuf,
    pub environment: String,
}

/// Consumer of ready events.
#[async_trait]
pub trait ReadySink: Send + Sync {
    /// Deliver the event. `Ok` means the consumer has taken ownership of it.
    async fn publish(&self, event: &ReadyEvent) -> Result<()>;
}

/// Writes each event as one JSON line.
pub struct JsonLineSink<W> {
    writer: Mutex<W>,
}

impl JsonLineSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ReadySink for JsonLineSink<W> {
    async fn publish(&self, event: &ReadyEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| VgsnapError::Internal(format!("serialize ready event: {}", e)))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.map_err(|e| VgsnapError::IoError {
            path: PathBuf::from("<stdout>"),
            source: e,
        })?;
        writer
            .flush()
            .await
            .map_err(|e| VgsnapError::IoError { path: PathBuf::from("<stdout>"), source: e })
    }
}

/// Runs a hook command with the event in its environment.
///
/// Fire-and-forget: the hook is detached once spawned and its exit status is
/// only logged.
pub struct HookSink {
    command: String,
}

impl HookSink {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl ReadySink for HookSink {
    #[instrument(skip(self, event), fields(clone_id = %event.clone_identifier))]
    async fn publish(&self, event: &ReadyEvent) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("VGSNAP_CLONE_ID", event.clone_identifier.to_string())
            .env("VGSNAP_MOUNT_PATH", &event.mount_path)
            .env("VGSNAP_ENVIRONMENT", &event.environment)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| VgsnapError::CommandFailed {
                program: self.command.clone(),
                reason: e.to_string(),
            })?;

        info!(pid = child.id(), "Ready hook started");

        let command = self.command.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(%command, "Ready hook finished"),
                Ok(status) => warn!(%command, %status, "Ready hook exited with failure"),
                Err(e) => warn!(%command, error = %e, "Failed to wait for ready hook"),
            }
        });
        Ok(())
    }
}

/// Forwards events over an mpsc channel.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<ReadyEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReadyEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ReadySink for ChannelSink {
    async fn publish(&self, event: &ReadyEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| VgsnapError::Internal("ready event receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn event() -> ReadyEvent {
        ReadyEvent {
            clone_identifier: CloneIdentifier::new(4000, "prd"),
            mount_path: PathBuf::from("/backup/prd"),
            environment: "prd".to_string(),
        }
    }

    #[tokio::test]
    async fn test_json_line_sink() {
        let sink = JsonLineSink::new(Vec::new());
        sink.publish(&event()).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "{\"clone_identifier\":\"4000-copy-prd\",\"mount_path\":\"/backup/prd\",\"environment\":\"prd\"}\n"
        );
    }

    #[tokio::test]
    async fn test_stdout_sink_publishes() {
        let sink = JsonLineSink::stdout();
        sink.publish(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.publish(&event()).await.unwrap();
        assert_eq!(rx.recv().await, Some(event()));

        drop(rx);
        assert!(sink.publish(&event()).await.is_err());
    }

    #[tokio::test]
    async fn test_hook_sink_exports_event() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("hook.out");
        let sink = HookSink::new(format!(
            "echo \"$VGSNAP_CLONE_ID $VGSNAP_MOUNT_PATH $VGSNAP_ENVIRONMENT\" > {}.tmp && mv {}.tmp {}",
            out.display(),
            out.display(),
            out.display()
        ));

        sink.publish(&event()).await.unwrap();

        let mut contents = None;
        for _ in 0..50 {
            if let Ok(text) = std::fs::read_to_string(&out) {
                contents = Some(text);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(contents.as_deref(), Some("4000-copy-prd /backup/prd prd\n"));
    }
}
