//! Volume group domain types.

use super::clone_id::CloneIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a clone's data comes from.
///
/// A single virtual disk is cloned as a one-disk volume group, so both variants
/// end up on the same create-then-clone path inside the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneSource {
    /// A multi-disk volume group on the control plane.
    VolumeGroup(String),
    /// A single virtual disk (by control-plane disk id).
    VirtualDisk(String),
}

impl fmt::Display for CloneSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VolumeGroup(id) => write!(f, "volume group {}", id),
            Self::VirtualDisk(id) => write!(f, "virtual disk {}", id),
        }
    }
}

/// Attachment state of a volume group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attachment {
    #[default]
    Unattached,
    AttachedTo(String),
}

impl Attachment {
    /// Whether the group is attached to `host_id`.
    #[must_use]
    pub fn is_attached_to(&self, host_id: &str) -> bool {
        matches!(self, Self::AttachedTo(host) if host == host_id)
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unattached => write!(f, "unattached"),
            Self::AttachedTo(host) => write!(f, "attached to {}", host),
        }
    }
}

/// A volume group as reported by the storage control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    /// Volume group name.
    pub id: String,

    /// Backing source, when the control plane reports it.
    pub source: Option<CloneSource>,

    /// Current attachment.
    pub attachment: Attachment,

    /// Number of disks in the group.
    pub disk_count: usize,
}

impl VolumeGroup {
    /// The clone identifier encoded in the group name, if it is a clone.
    #[must_use]
    pub fn clone_identifier(&self) -> Option<CloneIdentifier> {
        CloneIdentifier::parse(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment() {
        let attached = Attachment::AttachedTo("util01".to_string());
        assert!(attached.is_attached_to("util01"));
        assert!(!attached.is_attached_to("util02"));
        assert!(!Attachment::Unattached.is_attached_to("util01"));
        assert_eq!(attached.to_string(), "attached to util01");
    }

    #[test]
    fn test_clone_source_serde() {
        let source: CloneSource = serde_json::from_str(r#"{"virtual_disk":"a1b2"}"#).unwrap();
        assert_eq!(source, CloneSource::VirtualDisk("a1b2".to_string()));
        let source: CloneSource = serde_json::from_str(r#"{"volume_group":"db-vg"}"#).unwrap();
        assert_eq!(source, CloneSource::VolumeGroup("db-vg".to_string()));
    }

    #[test]
    fn test_clone_identifier_from_group() {
        let vg = VolumeGroup {
            id: "3000-copy-prd".to_string(),
            source: None,
            attachment: Attachment::Unattached,
            disk_count: 1,
        };
        assert_eq!(vg.clone_identifier(), Some(CloneIdentifier::new(3000, "prd")));
    }
}
