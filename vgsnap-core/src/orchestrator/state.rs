//! Run states and the report produced at the end of a run.

use crate::error::VgsnapError;
use crate::types::CloneIdentifier;
use serde::Serialize;
use std::fmt;

/// Stage of one clone-lifecycle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Reclaiming,
    Freezing,
    Cloning,
    Thawing,
    Attaching,
    Mounting,
    Ready,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Reclaiming => "reclaiming",
            Stage::Freezing => "freezing",
            Stage::Cloning => "cloning",
            Stage::Thawing => "thawing",
            Stage::Attaching => "attaching",
            Stage::Mounting => "mounting",
            Stage::Ready => "ready",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Stage the run failed in.
    pub stage: Stage,
    /// Short reason, e.g. `escalated` or `verification failed`.
    pub reason: String,
    /// Remote operation that failed, when known.
    pub operation: Option<String>,
    /// Full error text, including remote output.
    pub detail: String,
    /// Clone created by this run, if it got that far.
    pub clone_id: Option<CloneIdentifier>,
}

impl Failure {
    pub fn new(stage: Stage, error: &VgsnapError, clone_id: Option<CloneIdentifier>) -> Self {
        let reason = match error {
            VgsnapError::ThawEscalated { .. } => "escalated".to_string(),
            VgsnapError::MountVerificationFailed { .. } => "verification failed".to_string(),
            VgsnapError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        };
        Self {
            stage,
            reason,
            operation: error.operation().map(str::to_string),
            detail: error.to_string(),
            clone_id,
        }
    }

    /// The source database may still be frozen: page someone.
    pub fn is_page_worthy(&self) -> bool {
        self.stage == Stage::Thawing
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed in {}: {}", self.stage, self.reason)?;
        if let Some(operation) = &self.operation {
            write!(f, " (operation {})", operation)?;
        }
        Ok(())
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Failed(Failure),
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub environment: String,
    /// Identifier of the clone created (or attempted) by this run.
    pub clone_id: Option<CloneIdentifier>,
    /// Clones deleted during reclamation, oldest first.
    pub evicted: Vec<CloneIdentifier>,
    /// Every stage entered, in order, starting with `Idle`.
    pub transitions: Vec<Stage>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            clone_id: None,
            evicted: Vec::new(),
            transitions: vec![Stage::Idle],
            outcome: RunOutcome::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, RunOutcome::Done)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            RunOutcome::Done => None,
            RunOutcome::Failed(failure) => Some(failure),
        }
    }

    /// Whether the run ever entered `stage`.
    pub fn entered(&self, stage: Stage) -> bool {
        self.transitions.contains(&stage)
    }
}
