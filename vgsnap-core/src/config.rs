//! Configuration management.
//!
//! One JSON file describes the control plane, the retry/timeout policy, and
//! every database environment. Each [`EnvironmentConfig`] fully parameterizes
//! one orchestrator run.

use crate::error::{Result, VgsnapError};
use crate::paths;
use crate::retry::RetryPolicy;
use crate::types::CloneSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at the configuration file.
pub const CONFIG_ENV: &str = "VGSNAP_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub control_plane: ControlPlaneConfig,
    pub retry: RetryConfig,
    pub thaw: ThawConfig,
    pub discovery: DiscoveryConfig,
    pub timeouts: TimeoutConfig,
    /// Prometheus textfile written at the end of a run.
    pub metrics_textfile: Option<PathBuf>,
    /// Command run with the ready event in its environment.
    pub ready_hook: Option<String>,
    pub environments: Vec<EnvironmentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            control_plane: ControlPlaneConfig::default(),
            retry: RetryConfig::default(),
            thaw: ThawConfig::default(),
            discovery: DiscoveryConfig::default(),
            timeouts: TimeoutConfig::default(),
            metrics_textfile: None,
            ready_hook: None,
            environments: Vec::new(),
        }
    }
}

/// Where and how to reach the storage control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub host: String,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub acli_path: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self { host: String::new(), user: None, identity_file: None, acli_path: "acli".to_string() }
    }
}

/// Bounded exponential backoff for transient control-plane failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Attempts for calls made while the database is frozen.
    pub window_attempts: u32,
    /// Fixed delay between those attempts.
    pub window_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 5, base_delay_ms: 500, max_delay_ms: 10_000, window_attempts: 2, window_delay_ms: 200 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }

    /// Short fixed backoff for the freeze window.
    pub fn window_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.window_attempts, Duration::from_millis(self.window_delay_ms))
    }
}

/// Bounded thaw retry before escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThawConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ThawConfig {
    fn default() -> Self {
        Self { attempts: 3, backoff_ms: 2_000 }
    }
}

/// How long to wait for an attached clone to show up on the utility host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { attempts: 10, interval_ms: 3_000 }
    }
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Control-plane reads.
    pub read_secs: u64,
    /// Create/clone/attach/detach/delete.
    pub storage_secs: u64,
    /// Freeze/thaw. The database is blocked on I/O meanwhile.
    pub guest_secs: u64,
    /// Local device and mount commands.
    pub local_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { read_secs: 10, storage_secs: 60, guest_secs: 15, local_secs: 30 }
    }
}

/// One database environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Environment tag, e.g. `prd`. Used in clone identifiers.
    pub name: String,

    /// Volume group or virtual disk to clone.
    pub source: CloneSource,

    /// Database host address.
    pub target_host: String,

    #[serde(default)]
    pub target_user: Option<String>,

    /// SSH identity file used to reach the database host.
    #[serde(default)]
    pub target_credential: Option<PathBuf>,

    pub freeze_command: String,
    pub thaw_command: String,

    /// Control-plane identity (VM uuid) of the utility host.
    pub mount_host_id: String,

    /// Utility host address; commands run locally when unset.
    #[serde(default)]
    pub mount_host_address: Option<String>,

    /// LVM volume group name the clone carries on the utility host.
    pub local_volume_group: String,

    /// Logical volume to mount; the group's first one when unset.
    #[serde(default)]
    pub logical_volume: Option<String>,

    pub mount_point: PathBuf,

    #[serde(default)]
    pub mount_options: Vec<String>,

    /// Existing clones kept when a new one is taken.
    pub retention_count: usize,
}

impl Config {
    /// Resolve the configuration file: explicit path, then `VGSNAP_CONFIG`, then the default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        paths::config_path()
    }

    /// Load and validate configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VgsnapError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config = Self::from_json(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| VgsnapError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VgsnapError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| VgsnapError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| VgsnapError::IoError { path: path.to_path_buf(), source: e })
    }

    /// Check the invariants the orchestrator relies on.
    ///
    /// Environments must not share a name, mount point or local volume group,
    /// so that concurrent runs never touch each other's state.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(VgsnapError::InvalidConfig { reason });

        if self.environments.is_empty() {
            return invalid("no environments configured".to_string());
        }
        if self.control_plane.host.is_empty() {
            return invalid("control_plane.host is required".to_string());
        }
        if self.thaw.attempts == 0 {
            return invalid("thaw.attempts must be at least 1".to_string());
        }
        if self.discovery.attempts == 0 {
            return invalid("discovery.attempts must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        let mut mount_points = HashSet::new();
        let mut volume_groups = HashSet::new();
        for env in &self.environments {
            env.validate()?;
            if !names.insert(env.name.as_str()) {
                return invalid(format!("duplicate environment name '{}'", env.name));
            }
            if !mount_points.insert(env.mount_point.as_path()) {
                return invalid(format!(
                    "mount point {} is shared by more than one environment",
                    env.mount_point.display()
                ));
            }
            if !volume_groups.insert(env.local_volume_group.as_str()) {
                return invalid(format!(
                    "local volume group '{}' is shared by more than one environment",
                    env.local_volume_group
                ));
            }
        }
        Ok(())
    }

    /// Look up an environment by name.
    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments.iter().find(|env| env.name == name).ok_or_else(|| {
            VgsnapError::InvalidConfig { reason: format!("unknown environment '{}'", name) }
        })
    }
}

impl EnvironmentConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(VgsnapError::InvalidConfig { reason });

        let name_ok = !self.name.is_empty()
            && self.name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !name_ok {
            return invalid(format!(
                "environment name '{}' must be non-empty and use only [a-z0-9_]",
                self.name
            ));
        }
        if self.retention_count == 0 {
            return invalid(format!("{}: retention_count must be at least 1", self.name));
        }
        if !self.mount_point.is_absolute() {
            return invalid(format!(
                "{}: mount_point {} must be absolute",
                self.name,
                self.mount_point.display()
            ));
        }
        for (field, value) in [
            ("target_host", &self.target_host),
            ("freeze_command", &self.freeze_command),
            ("thaw_command", &self.thaw_command),
            ("mount_host_id", &self.mount_host_id),
            ("local_volume_group", &self.local_volume_group),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{}: {} is required", self.name, field));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_json(name: &str, mount_point: &str, vg: &str) -> String {
        format!(
            r#"{{
                "name": "{name}",
                "source": {{"virtual_disk": "disk-{name}"}},
                "target_host": "db-{name}",
                "freeze_command": "db2 set write suspend for database",
                "thaw_command": "db2 set write resume for database",
                "mount_host_id": "util-uuid",
                "local_volume_group": "{vg}",
                "mount_point": "{mount_point}",
                "retention_count": 2
            }}"#
        )
    }

    fn config_json(envs: &[String]) -> String {
        format!(
            r#"{{"control_plane": {{"host": "cvm01"}}, "environments": [{}]}}"#,
            envs.join(",")
        )
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_json(&config_json(&[env_json("prd", "/backup/prd", "prdvg")]))
            .unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.thaw.attempts, 3);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.control_plane.acli_path, "acli");
        assert_eq!(config.timeouts.guest_secs, 15);

        let env = config.environment("prd").unwrap();
        assert_eq!(env.source, CloneSource::VirtualDisk("disk-prd".to_string()));
        assert_eq!(env.retention_count, 2);
        assert!(env.mount_options.is_empty());
        assert!(config.environment("dr").is_err());
    }

    #[test]
    fn test_rejects_shared_mount_point() {
        let json = config_json(&[
            env_json("prd", "/backup/shared", "prdvg"),
            env_json("tst", "/backup/shared", "tstvg"),
        ]);
        let err = Config::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("mount point"));
    }

    #[test]
    fn test_rejects_shared_volume_group_and_duplicate_names() {
        let json = config_json(&[
            env_json("prd", "/backup/prd", "vg"),
            env_json("tst", "/backup/tst", "vg"),
        ]);
        assert!(Config::from_json(&json).unwrap_err().to_string().contains("local volume group"));

        let json = config_json(&[
            env_json("prd", "/backup/a", "a"),
            env_json("prd", "/backup/b", "b"),
        ]);
        assert!(Config::from_json(&json).unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_ambiguous_environment_name() {
        let json = config_json(&[env_json("prd-copy-x", "/backup/prd", "prdvg")]);
        assert!(matches!(Config::from_json(&json), Err(VgsnapError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_zero_retention() {
        let json = config_json(&[env_json("prd", "/backup/prd", "prdvg")])
            .replace(r#""retention_count": 2"#, r#""retention_count": 0"#);
        assert!(Config::from_json(&json).unwrap_err().to_string().contains("retention_count"));
    }

    #[test]
    fn test_rejects_empty_environment_list() {
        let err = Config::from_json(r#"{"control_plane": {"host": "cvm01"}}"#).unwrap_err();
        assert!(err.to_string().contains("no environments"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config::from_json(&config_json(&[env_json("dr", "/backup/dr", "drvg")])).unwrap();

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded.environments, config.environments);
        assert_eq!(loaded.control_plane.host, "cvm01");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, VgsnapError::InvalidConfig { .. }));
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let explicit = PathBuf::from("/tmp/vgsnap-explicit.json");
        assert_eq!(Config::resolve_path(Some(&explicit)), explicit);
    }
}
