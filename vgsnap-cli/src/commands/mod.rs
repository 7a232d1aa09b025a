//! CLI command implementations

pub mod check;
pub mod list;
pub mod plan;
pub mod run;

pub use check::check_config;
pub use list::list;
pub use plan::plan;
pub use run::run;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use vgsnap_core::adapters::{AdapterFactory, StorageControl};
use vgsnap_core::{
    CloneLifecycleOrchestrator, Config, EnvironmentConfig, HookSink, JsonLineSink,
    OrchestratorSettings, ReadySink,
};

/// Ready-event consumer selected by configuration.
fn ready_sink(config: &Config) -> Arc<dyn ReadySink> {
    match &config.ready_hook {
        Some(hook) => Arc::new(HookSink::new(hook.clone())),
        None => Arc::new(JsonLineSink::stdout()),
    }
}

/// Orchestrator for `env` with production adapters.
fn orchestrator(
    config: &Config,
    env: &EnvironmentConfig,
    storage: Arc<dyn StorageControl>,
    sink: Arc<dyn ReadySink>,
) -> CloneLifecycleOrchestrator {
    let adapters = AdapterFactory::for_environment(config, env, storage);
    CloneLifecycleOrchestrator::new(env.clone(), adapters, sink)
        .with_settings(OrchestratorSettings::from_config(config))
}

/// Read-only orchestrator for `list`/`plan`.
fn inspector(config: &Config, env_name: &str) -> anyhow::Result<CloneLifecycleOrchestrator> {
    let env = config.environment(env_name)?;
    let storage = AdapterFactory::storage(config);
    Ok(orchestrator(config, env, storage, ready_sink(config)))
}

/// Human-readable age of a clone created at `timestamp`.
fn age(timestamp: u64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let secs = now.saturating_sub(timestamp);
    match secs {
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_buckets() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(age(now), "0m");
        assert_eq!(age(now - 2 * 3600 - 5 * 60), "2h 5m");
        assert_eq!(age(now - 3 * 86_400 - 3600), "3d 1h");
        assert_eq!(age(now + 60), "0m");
    }
}
