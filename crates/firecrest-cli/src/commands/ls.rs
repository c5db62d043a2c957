//! Ls command implementation.

use anyhow::Result;
use console::style;
use firecrest_client::Firecrest;

use super::common::print_json;

/// Execute the ls command.
pub async fn execute(
    client: &Firecrest,
    machine: &str,
    path: &str,
    all: bool,
    recursive: bool,
    json: bool,
) -> Result<()> {
    let entries = client.list_files(machine, path, all, recursive).await?;
    if json {
        return print_json(&entries);
    }

    for entry in &entries {
        let name = if entry.kind == "d" {
            style(entry.name.clone()).blue().bold()
        } else if entry.kind == "l" {
            style(format!("{} -> {}", entry.name, entry.link_target)).cyan()
        } else {
            style(entry.name.clone())
        };
        println!(
            "{}{} {:<10} {:<10} {:>12} {} {}",
            entry.kind,
            entry.permissions,
            entry.user,
            entry.group,
            entry.size,
            style(&entry.last_modified).dim(),
            name
        );
    }
    Ok(())
}
