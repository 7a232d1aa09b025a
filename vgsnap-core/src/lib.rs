//! vgsnap core library
//!
//! Clone-lifecycle orchestration for application-consistent volume-group
//! backups: reclaim aged clones, freeze the database, clone, thaw, then attach
//! and mount the clone on a utility host for a backup agent to read.

pub mod adapters;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod paths;
pub mod retention;
pub mod retry;
pub mod types;

// Re-export commonly used items
pub use config::{Config, EnvironmentConfig};
pub use error::{Outcome, Result, VgsnapError};
pub use events::{ChannelSink, HookSink, JsonLineSink, ReadyEvent, ReadySink};
pub use observability::{init as init_observability, Telemetry};
pub use orchestrator::{
    CloneLifecycleOrchestrator, EvictionPlan, Failure, OrchestratorSettings, RunOutcome, RunReport, Stage,
};
pub use retention::select_for_eviction;
pub use types::{Attachment, CloneIdentifier, CloneSource, MountState, VolumeGroup};
