//! Collaborator adapters.
//!
//! The orchestrator depends on three traits, each backed by a production
//! adapter that shells out through a [`CommandRunner`]:
//! - [`StorageControl`]: the storage control plane (`acli` on a control-plane host)
//! - [`GuestFreeze`]: database freeze/thaw on the database host
//! - [`MountHost`]: LVM discovery and mounting on the utility host

pub mod factory;
pub mod guest;
pub mod mount;
pub mod runner;
pub mod storage;

pub use factory::{AdapterFactory, EnvironmentAdapters};
pub use guest::{GuestFreeze, ShellGuestFreeze};
pub use mount::{LvmMountHost, MountHost};
pub use runner::{CommandOutput, CommandRunner, LocalRunner, SshRunner};
pub use storage::{AcliStorageClient, StorageControl, StorageTimeouts};
