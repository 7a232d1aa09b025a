//! Utility-host device and filesystem state.
//!
//! [`LvmMountHost`] drives LVM and util-linux tools through a [`CommandRunner`],
//! local by default, so the same code serves a remote utility host over SSH.

use crate::adapters::runner::{CommandOutput, CommandRunner};
use crate::error::{Outcome, Result, VgsnapError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Device discovery and mounting on the utility host.
#[async_trait]
pub trait MountHost: Send + Sync {
    /// Re-scan physical-volume metadata so newly attached disks become visible.
    async fn refresh_device_metadata(&self) -> Result<()>;

    /// Kernel device path of the logical volume in `volume_group`.
    ///
    /// Returns `DeviceNotFound` when the group is not (yet) visible.
    async fn resolve_device_path(&self, volume_group: &str) -> Result<PathBuf>;

    async fn mount(&self, device: &Path, mount_point: &Path) -> Result<()>;

    /// Unmount. Not mounted is `AlreadyAchieved`.
    async fn unmount(&self, mount_point: &Path) -> Result<Outcome>;

    async fn is_mounted(&self, mount_point: &Path) -> Result<bool>;

    /// Deactivate and forget the local definition of `volume_group`.
    /// An absent group is `AlreadyAchieved`.
    async fn release_volume_group(&self, volume_group: &str) -> Result<Outcome>;
}

#[derive(Debug, Deserialize)]
struct LvsReport {
    report: Vec<LvsReportEntry>,
}

#[derive(Debug, Deserialize)]
struct LvsReportEntry {
    #[serde(default)]
    lv: Vec<LvsVolume>,
}

#[derive(Debug, Deserialize)]
struct LvsVolume {
    lv_name: String,
    #[serde(default)]
    lv_path: String,
}

/// LVM-backed mount host.
pub struct LvmMountHost {
    runner: Arc<dyn CommandRunner>,
    logical_volume: Option<String>,
    mount_options: Vec<String>,
    timeout: Duration,
}

impl LvmMountHost {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            logical_volume: None,
            mount_options: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Mount this logical volume instead of the group's first one.
    pub fn with_logical_volume(mut self, logical_volume: Option<String>) -> Self {
        self.logical_volume = logical_volume;
        self
    }

    pub fn with_mount_options(mut self, options: Vec<String>) -> Self {
        self.mount_options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exec(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(program, &args, self.timeout).await
    }

    async fn exec_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.exec(program, args).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(VgsnapError::CommandFailed {
                program: program.to_string(),
                reason: output.error_text(),
            })
        }
    }

    fn pick_volume(&self, volume_group: &str, volumes: Vec<LvsVolume>) -> Result<PathBuf> {
        let count = volumes.len();
        let chosen = match &self.logical_volume {
            Some(name) => volumes.into_iter().find(|lv| &lv.lv_name == name),
            None => volumes.into_iter().next(),
        };
        let lv = chosen.ok_or_else(|| VgsnapError::PreconditionViolation {
            subject: format!("volume group {}", volume_group),
            expected: match &self.logical_volume {
                Some(name) => format!("logical volume {}", name),
                None => "at least one logical volume".to_string(),
            },
            actual: format!("{} logical volume(s)", count),
        })?;

        if lv.lv_path.is_empty() {
            Ok(PathBuf::from("/dev").join(volume_group).join(&lv.lv_name))
        } else {
            Ok(PathBuf::from(lv.lv_path))
        }
    }
}

fn is_missing_vg(output: &CommandOutput) -> bool {
    let text = output.error_text().to_lowercase();
    text.contains("not found") || text.contains("no such")
}

/// Parse `lvs --reportformat json` output.
fn parse_lvs(stdout: &str) -> Result<Vec<LvsVolume>> {
    let report: LvsReport = serde_json::from_str(stdout.trim()).map_err(|e| {
        VgsnapError::CommandFailed { program: "lvs".to_string(), reason: format!("bad report: {}", e) }
    })?;
    Ok(report.report.into_iter().flat_map(|entry| entry.lv).collect())
}

#[async_trait]
impl MountHost for LvmMountHost {
    #[instrument(skip(self))]
    async fn refresh_device_metadata(&self) -> Result<()> {
        self.exec_checked("pvscan", &["--cache"]).await?;
        self.exec_checked("vgscan", &["--mknodes"]).await?;
        debug!("Device metadata refreshed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_device_path(&self, volume_group: &str) -> Result<PathBuf> {
        let activate = self.exec("vgchange", &["-ay", volume_group]).await?;
        if !activate.is_success() {
            if is_missing_vg(&activate) {
                return Err(VgsnapError::DeviceNotFound { volume_group: volume_group.to_string() });
            }
            return Err(VgsnapError::CommandFailed {
                program: "vgchange".to_string(),
                reason: activate.error_text(),
            });
        }

        let lvs = self
            .exec_checked("lvs", &["--reportformat", "json", "-o", "lv_name,lv_path", volume_group])
            .await?;
        let device = self.pick_volume(volume_group, parse_lvs(&lvs.stdout)?)?;
        debug!(device = %device.display(), "Resolved device path");
        Ok(device)
    }

    #[instrument(skip(self))]
    async fn mount(&self, device: &Path, mount_point: &Path) -> Result<()> {
        let device_arg = device.to_string_lossy();
        let mount_arg = mount_point.to_string_lossy();

        self.exec_checked("mkdir", &["-p", &*mount_arg]).await?;

        let options = self.mount_options.join(",");
        let mut args: Vec<&str> = Vec::new();
        if !options.is_empty() {
            args.push("-o");
            args.push(&options);
        }
        args.push(&*device_arg);
        args.push(&*mount_arg);

        let output = self.exec("mount", &args).await?;
        if !output.is_success() {
            return Err(VgsnapError::MountFailed {
                device: device.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
                reason: output.error_text(),
            });
        }
        info!(device = %device.display(), mount_point = %mount_point.display(), "Mounted clone");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unmount(&self, mount_point: &Path) -> Result<Outcome> {
        if !self.is_mounted(mount_point).await? {
            debug!(mount_point = %mount_point.display(), "Not mounted");
            return Ok(Outcome::AlreadyAchieved);
        }
        let mount_arg = mount_point.to_string_lossy();
        self.exec_checked("umount", &[&*mount_arg]).await?;
        info!(mount_point = %mount_point.display(), "Unmounted");
        Ok(Outcome::Applied)
    }

    async fn is_mounted(&self, mount_point: &Path) -> Result<bool> {
        let mount_arg = mount_point.to_string_lossy();
        let output = self.exec("mountpoint", &["-q", &*mount_arg]).await?;
        Ok(output.is_success())
    }

    #[instrument(skip(self))]
    async fn release_volume_group(&self, volume_group: &str) -> Result<Outcome> {
        let output = self.exec("vgchange", &["-an", volume_group]).await?;
        if output.is_success() {
            info!(volume_group, "Deactivated local volume group");
            return Ok(Outcome::Applied);
        }
        if is_missing_vg(&output) {
            return Ok(Outcome::AlreadyAchieved);
        }
        Err(VgsnapError::CommandFailed { program: "vgchange".to_string(), reason: output.error_text() })
    }
}
