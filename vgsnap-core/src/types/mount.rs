//! Mount state for a single orchestration run.

use std::path::PathBuf;

/// Device and mount point of the clone on the utility host. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountState {
    /// Kernel device path resolved from the local volume group.
    pub device: PathBuf,

    /// Where the clone filesystem is mounted.
    pub mount_point: PathBuf,

    /// Whether the mount was verified.
    pub mounted: bool,
}

impl MountState {
    pub fn new(device: PathBuf, mount_point: PathBuf) -> Self {
        Self { device, mount_point, mounted: false }
    }
}
