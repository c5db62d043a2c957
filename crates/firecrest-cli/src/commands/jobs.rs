//! Job commands: poll, poll-active and cancel.

use anyhow::Result;
use console::style;
use firecrest_client::{AccountingQuery, Firecrest};
use serde_json::Value;

use super::common::{plain, print_json, spinner};

fn print_jobs(jobs: &[Value]) {
    if jobs.is_empty() {
        println!("{}", style("No jobs").dim());
        return;
    }
    println!(
        "{}",
        style(format!(
            "{:<10} {:<20} {:<12} {:<12} {}",
            "JOBID", "NAME", "STATE", "TIME", "NODES"
        ))
        .bold()
    );
    for job in jobs {
        let state = plain(&job["state"]);
        let color = match state.as_str() {
            "COMPLETED" | "RUNNING" => console::Color::Green,
            "PENDING" => console::Color::Yellow,
            "FAILED" | "CANCELLED" | "TIMEOUT" => console::Color::Red,
            _ => console::Color::White,
        };
        let state = style(state).fg(color);
        println!(
            "{:<10} {:<20} {:<12} {:<12} {}",
            plain(&job["jobid"]),
            plain(&job["name"]),
            state,
            plain(&job["time"]),
            plain(&job["nodelist"])
        );
    }
}

/// Execute the poll command.
pub async fn poll(
    client: &Firecrest,
    machine: &str,
    job_ids: &[String],
    query: &AccountingQuery,
    json: bool,
) -> Result<()> {
    let progress = spinner("Querying accounting...");
    let jobs = client.poll(machine, job_ids, query).await;
    progress.finish_and_clear();
    let jobs = jobs?;

    if json {
        return print_json(&jobs);
    }
    print_jobs(&jobs);
    Ok(())
}

/// Execute the poll-active command.
pub async fn poll_active(
    client: &Firecrest,
    machine: &str,
    job_ids: &[String],
    page_size: Option<u32>,
    page_number: Option<u32>,
    json: bool,
) -> Result<()> {
    let progress = spinner("Querying the queue...");
    let jobs = client
        .poll_active(machine, job_ids, page_size, page_number)
        .await;
    progress.finish_and_clear();
    let jobs = jobs?;

    if json {
        return print_json(&jobs);
    }
    print_jobs(&jobs);
    Ok(())
}

/// Execute the cancel command.
pub async fn cancel(client: &Firecrest, machine: &str, job_id: &str, json: bool) -> Result<()> {
    let progress = spinner(format!("Cancelling job {job_id}..."));
    let result = client.cancel(machine, job_id).await;
    progress.finish_and_clear();
    let result = result?;

    if json {
        return print_json(&result);
    }
    println!(
        "{} Job {} cancelled: {}",
        style("✓").green().bold(),
        style(job_id).bold(),
        plain(&result)
    );
    Ok(())
}
