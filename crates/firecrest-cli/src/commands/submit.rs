//! Submit command implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use console::style;
use firecrest_client::{Firecrest, JobScript};

use super::common::{plain, print_json, spinner};

/// Execute the submit command.
pub async fn execute(
    client: &Firecrest,
    machine: &str,
    script: &str,
    remote: bool,
    account: Option<&str>,
    env: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let script = if remote {
        JobScript::Remote(script.to_string())
    } else {
        let path = PathBuf::from(script);
        if !path.is_file() {
            anyhow::bail!("File not found: {script} (use --remote for a script on {machine})");
        }
        JobScript::LocalFile(path)
    };
    let env: BTreeMap<String, String> = env.into_iter().collect();

    let progress = spinner(format!("Submitting to {machine}..."));
    let job = client
        .submit(machine, script, account, (!env.is_empty()).then_some(&env))
        .await;
    progress.finish_and_clear();
    let job = job?;

    if json {
        return print_json(&job);
    }
    println!(
        "{} Job {} submitted to {}",
        style("✓").green().bold(),
        style(plain(&job["jobid"])).bold(),
        machine
    );
    println!("  Task:   {}", style(plain(&job["firecrest_taskid"])).dim());
    if let Some(out) = job.get("job_file_out") {
        println!("  Output: {}", plain(out));
    }
    if let Some(err) = job.get("job_file_err") {
        println!("  Error:  {}", plain(err));
    }
    Ok(())
}
