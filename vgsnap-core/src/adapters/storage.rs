//! Storage control plane: volume-group listing, cloning and attachment.
//!
//! [`StorageControl`] is the contract the orchestrator depends on. Each call is a
//! single attempt; transient failures come back as `VgsnapError::Transient` or
//! `VgsnapError::Timeout` and the orchestrator decides whether to retry.
//!
//! [`AcliStorageClient`] implements it with the control plane's `acli -o json`
//! command set, executed on a control-plane host through a [`CommandRunner`].

use crate::adapters::runner::CommandRunner;
use crate::error::{Outcome, Result, VgsnapError};
use crate::retention::clones_in_namespace;
use crate::types::{Attachment, VolumeGroup};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Storage control plane operations.
#[async_trait]
pub trait StorageControl: Send + Sync {
    /// List the clone volume groups in `environment`'s namespace. Read-only.
    async fn list_volume_groups(&self, environment: &str) -> Result<Vec<VolumeGroup>>;

    /// Disk ids of a volume group, in disk index order. Read-only.
    async fn volume_group_disks(&self, id: &str) -> Result<Vec<String>>;

    /// Detach a group from a host. Already-detached is `AlreadyAchieved`.
    async fn detach_from_host(&self, id: &str, host_id: &str) -> Result<Outcome>;

    /// Delete a group. A missing group is `AlreadyAchieved`.
    async fn delete_volume_group(&self, id: &str) -> Result<Outcome>;

    /// Create an empty group. An existing group is `AlreadyAchieved`.
    async fn create_volume_group(&self, id: &str) -> Result<Outcome>;

    /// Clone a disk into a group. Not idempotent.
    async fn clone_disk_into_volume_group(&self, id: &str, source_disk: &str) -> Result<()>;

    /// Attach a group to a host. Already-attached is `AlreadyAchieved`.
    async fn attach_to_host(&self, id: &str, host_id: &str) -> Result<Outcome>;

    /// Adapter name (for logging/metrics).
    fn name(&self) -> &str;
}

/// Timeouts for control-plane calls.
#[derive(Debug, Clone, Copy)]
pub struct StorageTimeouts {
    /// Reads (list/get) and the metadata-only create.
    pub read: Duration,
    /// Mutations that may involve backing-storage work (clone/attach/detach/delete).
    pub mutate: Duration,
}

impl Default for StorageTimeouts {
    fn default() -> Self {
        Self { read: Duration::from_secs(10), mutate: Duration::from_secs(60) }
    }
}

/// What a control-plane error message means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcliErrorKind {
    NotFound,
    AlreadyExists,
    NotAttached,
    AlreadyAttached,
    Transient,
    Other,
}

/// Classify an `acli` error message.
#[must_use]
pub fn classify_acli_error(message: &str) -> AcliErrorKind {
    let msg = message.to_lowercase();
    if msg.contains("not attached") {
        AcliErrorKind::NotAttached
    } else if msg.contains("already attached") {
        AcliErrorKind::AlreadyAttached
    } else if msg.contains("already exists") || msg.contains("duplicate") {
        AcliErrorKind::AlreadyExists
    } else if msg.contains("unknown name")
        || msg.contains("does not exist")
        || msg.contains("not found")
        || msg.contains("entity_not_exist")
    {
        AcliErrorKind::NotFound
    } else if msg.contains("timed out")
        || msg.contains("timeout")
        || msg.contains("unavailable")
        || msg.contains("try again")
        || msg.contains("connection refused")
    {
        AcliErrorKind::Transient
    } else {
        AcliErrorKind::Other
    }
}

/// `acli -o json` response envelope.
#[derive(Debug, Deserialize)]
struct AcliResponse {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AcliVgSummary {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AcliVgDetail {
    name: String,
    #[serde(default)]
    attachment_list: Vec<AcliAttachment>,
    #[serde(default)]
    disk_list: Vec<AcliDisk>,
}

#[derive(Debug, Deserialize)]
struct AcliAttachment {
    #[serde(default)]
    vm_uuid: Option<String>,
    #[serde(default)]
    vm_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcliDisk {
    #[serde(default)]
    index: u32,
    vmdisk_uuid: String,
}

/// `acli`-backed storage control client.
pub struct AcliStorageClient {
    runner: Arc<dyn CommandRunner>,
    acli_path: String,
    timeouts: StorageTimeouts,
}

impl AcliStorageClient {
    pub fn new(runner: Arc<dyn CommandRunner>, acli_path: impl Into<String>) -> Self {
        Self { runner, acli_path: acli_path.into(), timeouts: StorageTimeouts::default() }
    }

    pub fn with_timeouts(mut self, timeouts: StorageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run one `acli` command and return its `data`, or a typed error.
    async fn call(&self, command: &str, args: &[&str], timeout: Duration) -> Result<serde_json::Value> {
        let mut argv = vec!["-o".to_string(), "json".to_string(), command.to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));

        debug!(command, ?args, runner = self.runner.target(), "acli call");
        let output = self.runner.run(&self.acli_path, &argv, timeout).await.map_err(|e| match e {
            VgsnapError::Timeout { seconds, .. } => {
                VgsnapError::Timeout { operation: command.to_string(), seconds }
            }
            VgsnapError::Transient { message, .. } => {
                VgsnapError::Transient { operation: command.to_string(), message }
            }
            other => other,
        })?;

        match serde_json::from_str::<AcliResponse>(output.stdout.trim()) {
            Ok(resp) if resp.status == 0 && output.is_success() => Ok(resp.data),
            Ok(resp) => {
                let message = resp
                    .error
                    .map(|e| match e {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| output.error_text());
                Err(acli_error(command, args.first().copied(), message))
            }
            Err(parse_err) if output.is_success() => Err(VgsnapError::Remote {
                operation: command.to_string(),
                message: format!("unparseable response: {}", parse_err),
            }),
            Err(_) => Err(VgsnapError::Remote {
                operation: command.to_string(),
                message: output.error_text(),
            }),
        }
    }

    async fn get_detail(&self, id: &str) -> Result<AcliVgDetail> {
        let data = self.call("vg.get", &[id], self.timeouts.read).await?;
        parse_vg_detail(data, id)
    }

    /// Map an `acli` error to an idempotent outcome when it means "already done".
    fn settle(result: Result<serde_json::Value>, already: AcliErrorKind) -> Result<Outcome> {
        match result {
            Ok(_) => Ok(Outcome::Applied),
            Err(VgsnapError::Remote { message, .. }) if classify_acli_error(&message) == already => {
                Ok(Outcome::AlreadyAchieved)
            }
            Err(VgsnapError::NotFound { .. }) if already == AcliErrorKind::NotFound => {
                Ok(Outcome::AlreadyAchieved)
            }
            Err(VgsnapError::AlreadyExists { .. }) if already == AcliErrorKind::AlreadyExists => {
                Ok(Outcome::AlreadyAchieved)
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the typed error for a failed `acli` command.
fn acli_error(command: &str, subject: Option<&str>, message: String) -> VgsnapError {
    let what = subject.unwrap_or(command).to_string();
    match classify_acli_error(&message) {
        AcliErrorKind::NotFound => VgsnapError::NotFound { what },
        AcliErrorKind::AlreadyExists => VgsnapError::AlreadyExists { what },
        AcliErrorKind::Transient => {
            VgsnapError::Transient { operation: command.to_string(), message }
        }
        AcliErrorKind::NotAttached | AcliErrorKind::AlreadyAttached | AcliErrorKind::Other => {
            VgsnapError::Remote { operation: command.to_string(), message }
        }
    }
}

/// Names listed by `vg.list`.
fn parse_vg_names(data: serde_json::Value) -> Result<Vec<String>> {
    let groups: Vec<AcliVgSummary> = serde_json::from_value(data).map_err(|e| VgsnapError::Remote {
        operation: "vg.list".to_string(),
        message: format!("unexpected response shape: {}", e),
    })?;
    Ok(groups.into_iter().map(|g| g.name).collect())
}

/// `vg.get` returns a map keyed by group uuid; take the entry named `id`.
fn parse_vg_detail(data: serde_json::Value, id: &str) -> Result<AcliVgDetail> {
    let groups: BTreeMap<String, AcliVgDetail> =
        serde_json::from_value(data).map_err(|e| VgsnapError::Remote {
            operation: "vg.get".to_string(),
            message: format!("unexpected response shape: {}", e),
        })?;
    groups
        .into_values()
        .find(|vg| vg.name == id)
        .ok_or_else(|| VgsnapError::NotFound { what: id.to_string() })
}

impl From<AcliVgDetail> for VolumeGroup {
    fn from(detail: AcliVgDetail) -> Self {
        let attachment = detail
            .attachment_list
            .into_iter()
            .find_map(|a| a.vm_uuid.or(a.vm_name))
            .map(Attachment::AttachedTo)
            .unwrap_or_default();
        Self {
            id: detail.name,
            // Not reported by vg.get.
            source: None,
            attachment,
            disk_count: detail.disk_list.len(),
        }
    }
}

#[async_trait]
impl StorageControl for AcliStorageClient {
    #[instrument(skip(self))]
    async fn list_volume_groups(&self, environment: &str) -> Result<Vec<VolumeGroup>> {
        let data = self.call("vg.list", &[], self.timeouts.read).await?;
        let all = parse_vg_names(data)?;
        let names = clones_in_namespace(all.iter().map(String::as_str), environment);

        let mut groups = Vec::with_capacity(names.len());
        for id in names {
            match self.get_detail(&id.to_string()).await {
                Ok(detail) => groups.push(VolumeGroup::from(detail)),
                // Deleted between list and get.
                Err(VgsnapError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        debug!(count = groups.len(), "Listed clone volume groups");
        Ok(groups)
    }

    #[instrument(skip(self))]
    async fn volume_group_disks(&self, id: &str) -> Result<Vec<String>> {
        let mut disks = self.get_detail(id).await?.disk_list;
        disks.sort_by_key(|d| d.index);
        Ok(disks.into_iter().map(|d| d.vmdisk_uuid).collect())
    }

    #[instrument(skip(self))]
    async fn detach_from_host(&self, id: &str, host_id: &str) -> Result<Outcome> {
        let result = self.call("vg.detach_from_vm", &[id, host_id], self.timeouts.mutate).await;
        let outcome = Self::settle(result, AcliErrorKind::NotAttached)?;
        info!(volume_group = %id, host = %host_id, ?outcome, "Detached volume group");
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn delete_volume_group(&self, id: &str) -> Result<Outcome> {
        let result = self.call("vg.delete", &[id], self.timeouts.mutate).await;
        let outcome = Self::settle(result, AcliErrorKind::NotFound)?;
        info!(volume_group = %id, ?outcome, "Deleted volume group");
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn create_volume_group(&self, id: &str) -> Result<Outcome> {
        // Runs inside the freeze window.
        let result = self.call("vg.create", &[id], self.timeouts.read).await;
        Self::settle(result, AcliErrorKind::AlreadyExists)
    }

    #[instrument(skip(self))]
    async fn clone_disk_into_volume_group(&self, id: &str, source_disk: &str) -> Result<()> {
        let clone_from = format!("clone_from_vmdisk={}", source_disk);
        self.call("vg.disk_create", &[id, &clone_from], self.timeouts.mutate).await.map_err(|e| {
            // Never retried blindly: a partial disk may exist.
            match e {
                VgsnapError::Transient { operation, message } => {
                    VgsnapError::Remote { operation, message }
                }
                other => other,
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn attach_to_host(&self, id: &str, host_id: &str) -> Result<Outcome> {
        let result = self.call("vg.attach_to_vm", &[id, host_id], self.timeouts.mutate).await;
        let outcome = Self::settle(result, AcliErrorKind::AlreadyAttached)?;
        info!(volume_group = %id, host = %host_id, ?outcome, "Attached volume group");
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "acli"
    }
}
