//! `vgsnap run` command

use crate::signal::cancel_on_signal;
use crate::{EXIT_FAILED, EXIT_OK, EXIT_THAW_ESCALATED};
use anyhow::Result;
use colored::Colorize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::error;
use vgsnap_core::adapters::AdapterFactory;
use vgsnap_core::{Config, EnvironmentConfig, RunReport};

/// Run the selected environments concurrently and return the process exit code.
pub async fn run(config: &Config, env_names: &[String]) -> Result<u8> {
    let selected: Vec<&EnvironmentConfig> = if env_names.is_empty() {
        config.environments.iter().collect()
    } else {
        env_names.iter().map(|name| config.environment(name)).collect::<Result<_, _>>()?
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let signals = tokio::spawn(cancel_on_signal(cancel_tx));

    let storage = AdapterFactory::storage(config);
    let sink = super::ready_sink(config);

    let mut runs = JoinSet::new();
    for env in selected {
        let orchestrator = super::orchestrator(config, env, storage.clone(), sink.clone());
        let cancel = cancel_rx.clone();
        runs.spawn(async move { orchestrator.run(cancel).await });
    }

    let mut reports = Vec::new();
    let mut crashed = false;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(error = %e, "Environment run task crashed");
                crashed = true;
            }
        }
    }
    signals.abort();

    reports.sort_by(|a, b| a.environment.cmp(&b.environment));
    for report in &reports {
        print_summary(report);
    }

    Ok(exit_code(&reports, crashed))
}

fn print_summary(report: &RunReport) {
    match report.failure() {
        None => {
            let clone = report.clone_id.as_ref().map(ToString::to_string).unwrap_or_default();
            eprintln!(
                "{} {}: {} ready ({} evicted)",
                "✓".green().bold(),
                report.environment.bold(),
                clone,
                report.evicted.len()
            );
        }
        Some(failure) => {
            let marker = if failure.is_page_worthy() { "‼".red().bold() } else { "✗".red().bold() };
            eprintln!("{} {}: {}", marker, report.environment.bold(), failure);
            match serde_json::to_string(report) {
                Ok(json) => eprintln!("{}", json),
                Err(e) => error!(error = %e, "Failed to serialize failure report"),
            }
        }
    }
}

fn exit_code(reports: &[RunReport], crashed: bool) -> u8 {
    if reports.iter().filter_map(RunReport::failure).any(|f| f.is_page_worthy()) {
        EXIT_THAW_ESCALATED
    } else if crashed || reports.iter().any(|r| !r.is_done()) {
        EXIT_FAILED
    } else {
        EXIT_OK
    }
}
