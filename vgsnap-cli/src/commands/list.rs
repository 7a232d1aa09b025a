//! `vgsnap list` command

use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};
use vgsnap_core::Config;

#[derive(Tabled)]
struct CloneRow {
    #[tabled(rename = "CLONE")]
    clone: String,
    #[tabled(rename = "CREATED")]
    created: u64,
    #[tabled(rename = "AGE")]
    age: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "DISKS")]
    disks: usize,
    #[tabled(rename = "ATTACHMENT")]
    attachment: String,
}

/// List an environment's clones, oldest first.
pub async fn list(config: &Config, env_name: &str) -> Result<()> {
    let orchestrator = super::inspector(config, env_name)?;
    let clones = orchestrator.remote_clones().await?;

    if clones.is_empty() {
        println!("No clones for {}", env_name);
        return Ok(());
    }

    let rows: Vec<CloneRow> = clones
        .into_iter()
        .map(|(id, group)| CloneRow {
            clone: id.to_string(),
            created: id.timestamp(),
            age: super::age(id.timestamp()),
            source: group.source.as_ref().map(ToString::to_string).unwrap_or_default(),
            disks: group.disk_count,
            attachment: group.attachment.to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{}", table);

    Ok(())
}
