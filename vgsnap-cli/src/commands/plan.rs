//! `vgsnap plan` command

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use vgsnap_core::Config;

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "CLONE")]
    clone: String,
    #[tabled(rename = "AGE")]
    age: String,
    #[tabled(rename = "ACTION")]
    action: String,
}

/// Show what the next run's reclamation would do, without changing anything.
pub async fn plan(config: &Config, env_name: &str) -> Result<()> {
    let orchestrator = super::inspector(config, env_name)?;
    let keep = orchestrator.environment().retention_count;
    let plan = orchestrator.plan().await?;

    let evict = plan.evicted.iter().map(|id| (id, "evict".red().to_string()));
    let retain = plan.retained.iter().map(|id| (id, "keep".green().to_string()));
    // Every evicted clone is older than every retained one.
    let rows: Vec<PlanRow> = evict
        .chain(retain)
        .map(|(id, action)| PlanRow {
            clone: id.to_string(),
            age: super::age(id.timestamp()),
            action,
        })
        .collect();

    if !rows.is_empty() {
        let mut table = Table::new(rows);
        table.with(Style::modern());
        println!("{}", table);
    }

    println!(
        "{} {}: keep {}, {} to evict, {} retained before the new clone",
        "→".cyan().bold(),
        env_name.bold(),
        keep,
        plan.evicted.len(),
        plan.retained.len()
    );

    Ok(())
}
