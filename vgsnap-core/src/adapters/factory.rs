//! Adapter factory: wires production adapters from configuration.

use crate::adapters::{
    AcliStorageClient, CommandRunner, GuestFreeze, LocalRunner, LvmMountHost, MountHost,
    ShellGuestFreeze, SshRunner, StorageControl, StorageTimeouts,
};
use crate::config::{Config, EnvironmentConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Hosts that are reached without SSH.
const LOCAL_HOSTS: &[&str] = &["localhost", "local"];

/// The three collaborators one orchestrator run needs.
#[derive(Clone)]
pub struct EnvironmentAdapters {
    pub storage: Arc<dyn StorageControl>,
    pub guest: Arc<dyn GuestFreeze>,
    pub mount: Arc<dyn MountHost>,
}

/// Factory for creating production adapters.
pub struct AdapterFactory;

impl AdapterFactory {
    /// Storage control-plane client shared by every environment.
    #[instrument(skip(config), fields(host = %config.control_plane.host))]
    pub fn storage(config: &Config) -> Arc<dyn StorageControl> {
        let cp = &config.control_plane;
        let runner = Self::runner(&cp.host, cp.user.as_deref(), cp.identity_file.clone(), config);
        let timeouts = StorageTimeouts {
            read: Duration::from_secs(config.timeouts.read_secs),
            mutate: Duration::from_secs(config.timeouts.storage_secs),
        };
        Arc::new(AcliStorageClient::new(runner, cp.acli_path.clone()).with_timeouts(timeouts))
    }

    /// Guest and mount-host adapters for one environment, sharing `storage`.
    #[instrument(skip_all, fields(environment = %env.name))]
    pub fn for_environment(
        config: &Config,
        env: &EnvironmentConfig,
        storage: Arc<dyn StorageControl>,
    ) -> EnvironmentAdapters {
        let guest_runner = Self::runner(
            &env.target_host,
            env.target_user.as_deref(),
            env.target_credential.clone(),
            config,
        );
        let guest = ShellGuestFreeze::new(guest_runner, &env.freeze_command, &env.thaw_command)
            .with_timeout(Duration::from_secs(config.timeouts.guest_secs));

        let mount_runner = match env.mount_host_address.as_deref() {
            Some(address) => Self::runner(address, None, None, config),
            None => Arc::new(LocalRunner) as Arc<dyn CommandRunner>,
        };
        let mount = LvmMountHost::new(mount_runner)
            .with_logical_volume(env.logical_volume.clone())
            .with_mount_options(env.mount_options.clone())
            .with_timeout(Duration::from_secs(config.timeouts.local_secs));

        EnvironmentAdapters { storage, guest: Arc::new(guest), mount: Arc::new(mount) }
    }

    fn runner(
        host: &str,
        user: Option<&str>,
        identity_file: Option<std::path::PathBuf>,
        config: &Config,
    ) -> Arc<dyn CommandRunner> {
        if LOCAL_HOSTS.contains(&host) {
            debug!(host, "Using local runner");
            return Arc::new(LocalRunner);
        }
        debug!(host, "Using ssh runner");
        Arc::new(
            SshRunner::new(host, user, identity_file)
                .with_connect_timeout(Duration::from_secs(config.timeouts.read_secs)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_adapters_for_every_environment() {
        let config = Config::from_json(
            r#"{
                "control_plane": {"host": "cvm01", "user": "nutanix"},
                "environments": [{
                    "name": "prd",
                    "source": {"volume_group": "db2-prd-vg"},
                    "target_host": "db-prd",
                    "freeze_command": "db2 set write suspend for database",
                    "thaw_command": "db2 set write resume for database",
                    "mount_host_id": "util-uuid",
                    "mount_host_address": "localhost",
                    "local_volume_group": "prdvg",
                    "mount_point": "/backup/prd",
                    "retention_count": 2
                }]
            }"#,
        )
        .unwrap();

        let storage = AdapterFactory::storage(&config);
        assert_eq!(storage.name(), "acli");

        let adapters = AdapterFactory::for_environment(&config, &config.environments[0], storage);
        assert_eq!(adapters.storage.name(), "acli");
    }
}
