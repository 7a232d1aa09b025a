//! `vgsnap check-config` command

use colored::Colorize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};
use vgsnap_core::Config;

#[derive(Tabled)]
struct EnvironmentRow {
    #[tabled(rename = "ENV")]
    name: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "DATABASE HOST")]
    target: String,
    #[tabled(rename = "LOCAL VG")]
    volume_group: String,
    #[tabled(rename = "MOUNT POINT")]
    mount_point: String,
    #[tabled(rename = "KEEP")]
    keep: usize,
}

/// Print a summary of an already validated configuration.
pub fn check_config(config: &Config, path: &Path) {
    let rows: Vec<EnvironmentRow> = config
        .environments
        .iter()
        .map(|env| EnvironmentRow {
            name: env.name.clone(),
            source: env.source.to_string(),
            target: env.target_host.clone(),
            volume_group: env.local_volume_group.clone(),
            mount_point: env.mount_point.display().to_string(),
            keep: env.retention_count,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    println!(
        "{} Configuration valid: {} ({} environment(s), control plane {})",
        "✓".green().bold(),
        path.display(),
        config.environments.len(),
        config.control_plane.host
    );
}
