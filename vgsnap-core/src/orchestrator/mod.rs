//! Clone-lifecycle orchestration.
//!
//! One [`CloneLifecycleOrchestrator`] drives one environment through
//! `Idle → Reclaiming → Freezing → Cloning → Thawing → Attaching → Mounting →
//! Ready → Done`, or into a single `Failed(stage, reason)` terminal.
//!
//! Invariants the sequence maintains:
//! - nothing is frozen until reclamation has brought the environment down to
//!   its retention count
//! - once a freeze has been requested, thaw is attempted exactly once per run
//!   (with bounded retries) before the run can end, even on cancellation
//! - the freeze window contains only the create and clone calls
//! - a clone that fails mount verification is never deleted by this run

pub mod state;

pub use state::{Failure, RunOutcome, RunReport, Stage};

use crate::adapters::{EnvironmentAdapters, GuestFreeze, MountHost, StorageControl};
use crate::config::{Config, EnvironmentConfig};
use crate::error::{Result, VgsnapError};
use crate::events::{ReadyEvent, ReadySink};
use crate::observability::metrics;
use crate::retention::select_for_eviction;
use crate::retry::{retry, RetryPolicy};
use crate::types::{CloneIdentifier, CloneSource, MountState, VolumeGroup};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Clones a run would keep and evict, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPlan {
    pub retained: Vec<CloneIdentifier>,
    pub evicted: Vec<CloneIdentifier>,
}

/// Retry and discovery knobs for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Transient control-plane failures (never applied to clone).
    pub retry: RetryPolicy,
    /// Thaw attempts before escalation.
    pub thaw: RetryPolicy,
    /// Transient failures while the database is frozen.
    pub in_window: RetryPolicy,
    /// Refresh/resolve rounds while waiting for an attached clone to appear.
    pub discovery_attempts: u32,
    pub discovery_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.policy(),
            thaw: RetryPolicy::fixed(config.thaw.attempts, Duration::from_millis(config.thaw.backoff_ms)),
            in_window: config.retry.window_policy(),
            discovery_attempts: config.discovery.attempts.max(1),
            discovery_interval: Duration::from_millis(config.discovery.interval_ms),
        }
    }
}

/// An error tagged with the stage the run fails in.
struct StageError {
    stage: Stage,
    error: VgsnapError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// Drives one environment's clone lifecycle.
pub struct CloneLifecycleOrchestrator {
    env: EnvironmentConfig,
    storage: Arc<dyn StorageControl>,
    guest: Arc<dyn GuestFreeze>,
    mount: Arc<dyn MountHost>,
    sink: Arc<dyn ReadySink>,
    settings: OrchestratorSettings,
}

impl CloneLifecycleOrchestrator {
    pub fn new(env: EnvironmentConfig, adapters: EnvironmentAdapters, sink: Arc<dyn ReadySink>) -> Self {
        Self {
            env,
            storage: adapters.storage,
            guest: adapters.guest,
            mount: adapters.mount,
            sink,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    /// Run once, stamping the new clone with the current wall-clock time.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> RunReport {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.run_at(timestamp, cancel).await
    }

    /// Run once with an explicit clone timestamp.
    #[instrument(skip(self, cancel), fields(environment = %self.env.name))]
    pub async fn run_at(&self, timestamp: u64, mut cancel: watch::Receiver<bool>) -> RunReport {
        let mut report = RunReport::new(&self.env.name);
        info!(keep = self.env.retention_count, source = %self.env.source, "Starting clone lifecycle run");

        let result = self.drive(timestamp, &mut cancel, &mut report).await;

        match result {
            Ok(()) => {
                metrics::record_run(&self.env.name, "done");
                info!(clone_id = ?report.clone_id, evicted = report.evicted.len(), "Run completed");
            }
            Err(StageError { stage, error }) => {
                let failure = Failure::new(stage, &error, report.clone_id.clone());
                metrics::record_run(&self.env.name, "failed");
                metrics::record_stage_failure(&self.env.name, stage.as_str());
                if failure.is_page_worthy() {
                    error!(%stage, error = %error, "Run failed: source database may still be frozen");
                } else {
                    error!(%stage, error = %error, "Run failed");
                }
                report.outcome = RunOutcome::Failed(failure);
            }
        }
        report
    }

    async fn drive(
        &self,
        timestamp: u64,
        cancel: &mut watch::Receiver<bool>,
        report: &mut RunReport,
    ) -> std::result::Result<(), StageError> {
        self.enter(report, Stage::Reclaiming);
        check_cancelled(cancel).at(Stage::Reclaiming)?;
        report.evicted = self.reclaim().await.at(Stage::Reclaiming)?;

        self.enter(report, Stage::Freezing);
        check_cancelled(cancel).at(Stage::Freezing)?;
        let disks = self.source_disks().await.at(Stage::Freezing)?;

        let clone_id = CloneIdentifier::new(timestamp, &self.env.name);
        self.freeze_clone_thaw(&clone_id, &disks, cancel, report).await?;

        self.enter(report, Stage::Attaching);
        check_cancelled(cancel).at(Stage::Attaching)?;
        let group = clone_id.to_string();
        retry(&self.settings.retry, "attach_to_host", || {
            self.storage.attach_to_host(&group, &self.env.mount_host_id)
        })
        .await
        .at(Stage::Attaching)?;
        info!(%clone_id, host = %self.env.mount_host_id, "Clone attached");

        self.enter(report, Stage::Mounting);
        check_cancelled(cancel).at(Stage::Mounting)?;
        let mount = self.mount_clone(&clone_id, cancel).await.at(Stage::Mounting)?;

        self.enter(report, Stage::Ready);
        let event = ReadyEvent {
            clone_identifier: clone_id,
            mount_path: mount.mount_point,
            environment: self.env.name.clone(),
        };
        self.sink.publish(&event).await.at(Stage::Ready)?;

        self.enter(report, Stage::Done);
        Ok(())
    }

    fn enter(&self, report: &mut RunReport, stage: Stage) {
        debug!(%stage, "Entering stage");
        report.transitions.push(stage);
    }

    /// Freeze, clone inside the window, then always thaw.
    async fn freeze_clone_thaw(
        &self,
        clone_id: &CloneIdentifier,
        disks: &[String],
        cancel: &mut watch::Receiver<bool>,
        report: &mut RunReport,
    ) -> std::result::Result<(), StageError> {
        let window = Instant::now();
        let frozen = tokio::select! {
            biased;
            result = self.guest.freeze(&self.env.name) => result,
            _ = cancelled(cancel) => Err(VgsnapError::Cancelled),
        };

        let clone_result = match frozen {
            Ok(()) => {
                info!("Database frozen");
                self.enter(report, Stage::Cloning);
                report.clone_id = Some(clone_id.clone());
                tokio::select! {
                    biased;
                    result = self.clone_into(clone_id, disks) => result.at(Stage::Cloning),
                    _ = cancelled(cancel) => Err(StageError { stage: Stage::Cloning, error: VgsnapError::Cancelled }),
                }
            }
            // Explicit rejection: the database was never frozen.
            Err(error @ VgsnapError::FreezeFailed { .. }) => {
                return Err(StageError { stage: Stage::Freezing, error });
            }
            // Timeout, cancellation or a lost connection: the freeze may have landed.
            Err(error) => {
                warn!(%error, "Freeze outcome unknown, thawing");
                Err(StageError { stage: Stage::Freezing, error })
            }
        };

        self.enter(report, Stage::Thawing);
        let thawed = self.thaw_with_retry().await;
        let elapsed = window.elapsed();
        metrics::record_freeze_window(&self.env.name, elapsed.as_secs_f64());
        info!(freeze_window_ms = elapsed.as_millis() as u64, thawed = thawed.is_ok(), "Freeze window closed");

        thawed.at(Stage::Thawing)?;
        clone_result
    }

    /// Step 1: clear the mount host and evict down to the retention count.
    #[instrument(skip(self))]
    async fn reclaim(&self) -> Result<Vec<CloneIdentifier>> {
        let env = &self.env;
        let policy = &self.settings.retry;

        let unmounted = self.mount.unmount(&env.mount_point).await?;
        let released = self.mount.release_volume_group(&env.local_volume_group).await?;
        debug!(unmounted = !unmounted.is_noop(), released = !released.is_noop(), "Mount host cleared");

        let clones = self.remote_clones().await?;

        let mut detached = false;
        for (id, group) in &clones {
            if group.attachment.is_attached_to(&env.mount_host_id) {
                let group_id = id.to_string();
                retry(policy, "detach_from_host", || {
                    self.storage.detach_from_host(&group_id, &env.mount_host_id)
                })
                .await?;
                info!(clone_id = %id, "Detached clone from mount host");
                detached = true;
            }
        }
        if detached {
            self.mount.refresh_device_metadata().await?;
        }

        let ids: Vec<CloneIdentifier> = clones.iter().map(|(id, _)| id.clone()).collect();
        let evict = select_for_eviction(&ids, env.retention_count);

        for id in &evict {
            if let Some((_, group)) = clones.iter().find(|(candidate, _)| candidate == id) {
                if let Some(owner) = foreign_owner(group, &env.mount_host_id) {
                    return Err(VgsnapError::PreconditionViolation {
                        subject: id.to_string(),
                        expected: format!("unattached or attached to {}", env.mount_host_id),
                        actual: format!("attached to {}", owner),
                    });
                }
            }
            let group_id = id.to_string();
            let outcome =
                retry(policy, "delete_volume_group", || self.storage.delete_volume_group(&group_id))
                    .await?;
            info!(clone_id = %id, already_gone = outcome.is_noop(), "Evicted clone");
        }
        metrics::record_evictions(&env.name, evict.len());

        let remaining = self.remote_clones().await?.len();
        if remaining > env.retention_count {
            return Err(VgsnapError::PreconditionViolation {
                subject: format!("{} clone namespace", env.name),
                expected: format!("at most {} clones after eviction", env.retention_count),
                actual: format!("{} clones", remaining),
            });
        }

        info!(evicted = evict.len(), remaining, "Reclamation complete");
        Ok(evict)
    }

    /// Source disks to clone, resolved before the freeze so the window stays minimal.
    async fn source_disks(&self) -> Result<Vec<String>> {
        let disks = match &self.env.source {
            CloneSource::VirtualDisk(disk) => vec![disk.clone()],
            CloneSource::VolumeGroup(group) => {
                retry(&self.settings.retry, "volume_group_disks", || {
                    self.storage.volume_group_disks(group)
                })
                .await?
            }
        };
        if disks.is_empty() {
            return Err(VgsnapError::PreconditionViolation {
                subject: self.env.source.to_string(),
                expected: "at least one disk".to_string(),
                actual: "no disks".to_string(),
            });
        }
        debug!(count = disks.len(), "Resolved source disks");
        Ok(disks)
    }

    /// Create the clone group and clone every source disk into it.
    #[instrument(skip(self, disks), fields(clone_id = %clone_id))]
    async fn clone_into(&self, clone_id: &CloneIdentifier, disks: &[String]) -> Result<()> {
        let group = clone_id.to_string();
        let policy = &self.settings.in_window;
        let created =
            retry(policy, "create_volume_group", || self.storage.create_volume_group(&group)).await?;

        if created.is_noop() {
            // Cloning is not idempotent: only continue into an empty group.
            let existing = retry(policy, "volume_group_disks", || {
                self.storage.volume_group_disks(&group)
            })
            .await?;
            if !existing.is_empty() {
                return Err(VgsnapError::PreconditionViolation {
                    subject: group,
                    expected: "empty volume group".to_string(),
                    actual: format!("{} disks", existing.len()),
                });
            }
        }

        for disk in disks {
            self.storage.clone_disk_into_volume_group(&group, disk).await?;
        }
        info!(disks = disks.len(), "Clone created");
        Ok(())
    }

    /// Thaw with bounded fixed-backoff retries; exhaustion escalates.
    async fn thaw_with_retry(&self) -> Result<()> {
        let policy = &self.settings.thaw;
        let attempts = policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.guest.thaw(&self.env.name).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Thaw failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        metrics::record_thaw_escalation(&self.env.name);
        error!(attempts, "Thaw retries exhausted, escalating");
        Err(VgsnapError::ThawEscalated {
            environment: self.env.name.clone(),
            attempts,
            reason: last_error,
        })
    }

    /// Discover the attached clone's device, mount it, and verify the mount.
    #[instrument(skip(self, cancel), fields(clone_id = %clone_id))]
    async fn mount_clone(
        &self,
        clone_id: &CloneIdentifier,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<MountState> {
        let device = self.discover_device(cancel).await?;
        let mut state = MountState::new(device, self.env.mount_point.clone());

        self.mount.mount(&state.device, &state.mount_point).await?;
        if !self.mount.is_mounted(&state.mount_point).await? {
            return Err(VgsnapError::MountVerificationFailed {
                clone_id: clone_id.to_string(),
                mount_point: state.mount_point,
            });
        }
        state.mounted = true;
        info!(device = %state.device.display(), mount_point = %state.mount_point.display(), "Clone mounted");
        Ok(state)
    }

    /// Refresh device metadata and resolve the device until attach has propagated.
    async fn discover_device(&self, cancel: &mut watch::Receiver<bool>) -> Result<PathBuf> {
        let attempts = self.settings.discovery_attempts;
        let volume_group = &self.env.local_volume_group;

        for attempt in 1..=attempts {
            self.mount.refresh_device_metadata().await?;
            match self.mount.resolve_device_path(volume_group).await {
                Ok(device) => return Ok(device),
                Err(VgsnapError::DeviceNotFound { .. }) if attempt < attempts => {
                    debug!(attempt, %volume_group, "Device not visible yet");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.discovery_interval) => {}
                        _ = cancelled(cancel) => return Err(VgsnapError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(VgsnapError::DeviceNotFound { volume_group: volume_group.clone() })
    }

    /// This environment's clones on the control plane, oldest first.
    ///
    /// Every clone in the namespace was cloned from the environment's source,
    /// which fills in `source` where the control plane leaves it out.
    pub async fn remote_clones(&self) -> Result<Vec<(CloneIdentifier, VolumeGroup)>> {
        let groups = retry(&self.settings.retry, "list_volume_groups", || {
            self.storage.list_volume_groups(&self.env.name)
        })
        .await?;

        let mut clones: Vec<(CloneIdentifier, VolumeGroup)> = groups
            .into_iter()
            .filter_map(|group| {
                group
                    .clone_identifier()
                    .filter(|id| id.belongs_to(&self.env.name))
                    .map(|id| {
                        let mut group = group;
                        group.source.get_or_insert_with(|| self.env.source.clone());
                        (id, group)
                    })
            })
            .collect();
        clones.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(clones)
    }

    /// What the next run's reclamation would do. Read-only.
    pub async fn plan(&self) -> Result<EvictionPlan> {
        let ids: Vec<CloneIdentifier> =
            self.remote_clones().await?.into_iter().map(|(id, _)| id).collect();
        let evicted = select_for_eviction(&ids, self.env.retention_count);
        let retained = ids.into_iter().filter(|id| !evicted.contains(id)).collect();
        Ok(EvictionPlan { retained, evicted })
    }
}

/// Host other than `mount_host` that `group` is attached to.
fn foreign_owner<'a>(group: &'a VolumeGroup, mount_host: &str) -> Option<&'a str> {
    match &group.attachment {
        crate::types::Attachment::AttachedTo(host) if host != mount_host => Some(host),
        _ => None,
    }
}

fn check_cancelled(cancel: &watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        return Err(VgsnapError::Cancelled);
    }
    Ok(())
}

/// Resolves once cancellation is requested. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|requested| *requested).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
