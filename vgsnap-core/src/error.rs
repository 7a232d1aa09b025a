//! Error types for vgsnap.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! "Already in the desired state" results are not errors; see [`Outcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vgsnap operations.
pub type Result<T> = std::result::Result<T, VgsnapError>;

/// Successful result of an idempotent collaborator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation changed remote or local state.
    Applied,
    /// The target was already in the requested state (detach-when-detached,
    /// delete-when-absent, unmount-when-unmounted).
    AlreadyAchieved,
}

impl Outcome {
    /// Whether the call was a no-op.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::AlreadyAchieved)
    }
}

/// Main error type for vgsnap.
#[derive(Error, Debug)]
pub enum VgsnapError {
    // Remote call errors
    #[error("{operation} failed transiently: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Already exists: {what}")]
    AlreadyExists { what: String },

    #[error("Precondition violated for {subject}: expected {expected}, found {actual}")]
    PreconditionViolation { subject: String, expected: String, actual: String },

    // Guest errors
    #[error("Freeze failed on {environment}: {reason}")]
    FreezeFailed { environment: String, reason: String },

    #[error("Thaw failed on {environment}: {reason}")]
    ThawFailed { environment: String, reason: String },

    #[error("Thaw escalated on {environment} after {attempts} attempts: {reason}")]
    ThawEscalated { environment: String, attempts: u32, reason: String },

    // Mount host errors
    #[error("No device found for volume group {volume_group}")]
    DeviceNotFound { volume_group: String },

    #[error("Failed to mount {device:?} at {mount_point:?}: {reason}")]
    MountFailed { device: PathBuf, mount_point: PathBuf, reason: String },

    #[error("Mount verification failed for clone {clone_id} at {mount_point:?}")]
    MountVerificationFailed { clone_id: String, mount_point: PathBuf },

    // Process errors
    #[error("Failed to run {program}: {reason}")]
    CommandFailed { program: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VgsnapError {
    /// Whether the retry layer may re-issue the call that produced this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Promote a transient error to a terminal remote failure once retries are exhausted.
    #[must_use]
    pub fn exhausted(self) -> Self {
        match self {
            Self::Transient { operation, message } => Self::Remote { operation, message },
            other => other,
        }
    }

    /// Name of the remote operation involved, when the error carries one.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        match self {
            Self::Transient { operation, .. }
            | Self::Remote { operation, .. }
            | Self::Timeout { operation, .. } => Some(operation),
            Self::CommandFailed { program, .. } => Some(program),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = VgsnapError::Transient {
            operation: "vg.list".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(transient.is_transient());
        assert!(VgsnapError::Timeout { operation: "vg.get".to_string(), seconds: 10 }
            .is_transient());
        assert!(!VgsnapError::Cancelled.is_transient());
    }

    #[test]
    fn test_exhausted_keeps_remote_text() {
        let err = VgsnapError::Transient {
            operation: "vg.delete".to_string(),
            message: "503 unavailable".to_string(),
        }
        .exhausted();

        assert!(!err.is_transient());
        assert_eq!(err.operation(), Some("vg.delete"));
        assert_eq!(err.to_string(), "vg.delete failed: 503 unavailable");
    }
}
