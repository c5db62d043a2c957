//! Task commands.

use anyhow::Result;
use console::style;
use firecrest_client::{Firecrest, Task};

use super::common::{plain, print_json};

fn status_style(task: &Task) -> console::StyledObject<String> {
    let text = task.status.to_string();
    if task.status.is_failure() {
        style(text).red()
    } else if task.status.code() >= 200 {
        style(text).green()
    } else {
        style(text).yellow()
    }
}

/// Execute the tasks command.
pub async fn list(client: &Firecrest, ids: &[String], json: bool) -> Result<()> {
    let tasks = client.tasks(ids).await?;
    if json {
        return print_json(&tasks);
    }

    if tasks.is_empty() {
        println!("{}", style("No tasks").dim());
        return Ok(());
    }
    println!(
        "{}",
        style(format!("{:<34} {:<7} {:<10} {}", "TASK", "STATUS", "SERVICE", "DESCRIPTION")).bold()
    );
    for (id, task) in &tasks {
        println!(
            "{:<34} {:<7} {:<10} {}",
            id,
            status_style(task),
            task.service.as_deref().unwrap_or("-"),
            task.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Execute the task command.
pub async fn show(client: &Firecrest, id: &str, json: bool) -> Result<()> {
    let task = client.task(id).await?;
    if json {
        return print_json(&task);
    }

    println!("{} {}", style("Task").cyan().bold(), style(&task.id).bold());
    println!("  Status:      {}", status_style(&task));
    if let Some(description) = &task.description {
        println!("  Description: {description}");
    }
    if let Some(system) = &task.system {
        println!("  System:      {system}");
    }
    if let Some(updated) = &task.last_modify {
        println!("  Updated:     {updated}");
    }
    println!("  Data:        {}", plain(&task.data));
    Ok(())
}
