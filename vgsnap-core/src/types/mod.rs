//! Core domain types for vgsnap.

pub mod clone_id;
pub mod mount;
pub mod volume_group;

// Re-exports
pub use clone_id::CloneIdentifier;
pub use mount::MountState;
pub use volume_group::{Attachment, CloneSource, VolumeGroup};
