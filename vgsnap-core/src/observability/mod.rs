//! Observability infrastructure: tracing and metrics.
//!
//! Runs are short-lived batch jobs, so metrics are not served over HTTP.
//! The Prometheus recorder is rendered into a textfile for the node
//! exporter's textfile collector when the process finishes.

use crate::error::{Result, VgsnapError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Handle kept by the binary for the lifetime of the process.
pub struct Telemetry {
    prometheus: Option<PrometheusHandle>,
    textfile: Option<PathBuf>,
}

/// Initialize logging and, when `metrics_textfile` is set, the Prometheus recorder.
///
/// `RUST_LOG` takes precedence over `log_level`. Logs go to stderr; stdout
/// carries the ready events.
pub fn init(log_level: &str, metrics_textfile: Option<&Path>) -> Result<Telemetry> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| VgsnapError::InvalidConfig {
            reason: format!("invalid log level '{}': {}", log_level, e),
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| VgsnapError::Internal(format!("tracing already initialized: {}", e)))?;

    let prometheus = match metrics_textfile {
        Some(_) => {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| VgsnapError::Internal(format!("metrics recorder: {}", e)))?;
            metrics::register_metrics();
            Some(handle)
        }
        None => None,
    };

    tracing::debug!(metrics = prometheus.is_some(), "Observability initialized");

    Ok(Telemetry { prometheus, textfile: metrics_textfile.map(Path::to_path_buf) })
}

impl Telemetry {
    /// Write the current metrics to the textfile, replacing it atomically.
    pub fn flush(&self) -> Result<()> {
        let (Some(handle), Some(path)) = (&self.prometheus, &self.textfile) else {
            return Ok(());
        };
        write_textfile(path, &handle.render())
    }
}

fn write_textfile(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, contents)
        .map_err(|e| VgsnapError::IoError { path: tmp.clone(), source: e })?;
    std::fs::rename(&tmp, path).map_err(|e| VgsnapError::IoError { path: path.to_path_buf(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_textfile_written_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vgsnap.prom");

        write_textfile(&path, "vgsnap_runs_total 1\n").unwrap();
        write_textfile(&path, "vgsnap_runs_total 2\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "vgsnap_runs_total 2\n");
        assert!(!dir.path().join("vgsnap.prom.tmp").exists());
    }

    #[test]
    fn test_flush_without_recorder_is_noop() {
        let telemetry = Telemetry { prometheus: None, textfile: None };
        telemetry.flush().unwrap();
    }
}
