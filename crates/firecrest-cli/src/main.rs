//! FirecREST Command-Line Interface
//!
//! The main entry point for the `firecrest` CLI tool.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use firecrest_client::ClientConfig;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{common, jobs, ls, status, submit, tasks};

/// FirecREST - access HPC systems through the FirecREST API
#[derive(Parser, Debug)]
#[command(name = "firecrest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: ~/.config/firecrest/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// FirecREST URL, overrides the configuration
    #[arg(long, global = true)]
    url: Option<String>,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Status of the microservices
    Services {
        /// Show one service only
        name: Option<String>,
    },

    /// Status of the systems
    Systems {
        /// Show one system only
        name: Option<String>,
    },

    /// Configuration parameters of the deployment
    Parameters,

    /// List a remote directory
    Ls {
        /// System name
        machine: String,

        /// Remote path
        path: String,

        /// Show hidden files
        #[arg(short, long)]
        all: bool,

        /// List subdirectories recursively
        #[arg(short = 'R', long)]
        recursive: bool,
    },

    /// Submit a batch script
    Submit {
        /// System name
        machine: String,

        /// Local batch script, or a remote one with --remote
        script: String,

        /// The script is already on the system
        #[arg(long)]
        remote: bool,

        /// Charge the job to this project account
        #[arg(long)]
        account: Option<String>,

        /// Environment variable for the job (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },

    /// Accounting information of jobs
    Poll {
        /// System name
        machine: String,

        /// Job ids (all recent jobs when omitted)
        jobs: Vec<String>,

        /// Start of the accounting window
        #[arg(long)]
        start_time: Option<String>,

        /// End of the accounting window
        #[arg(long)]
        end_time: Option<String>,

        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        page_number: Option<u32>,
    },

    /// Queued and running jobs
    PollActive {
        /// System name
        machine: String,

        /// Job ids (all active jobs when omitted)
        jobs: Vec<String>,

        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        page_number: Option<u32>,
    },

    /// Cancel a job
    Cancel {
        /// System name
        machine: String,

        /// Job id
        job_id: String,
    },

    /// List FirecREST tasks
    Tasks {
        /// Task ids (all tasks when omitted)
        ids: Vec<String>,
    },

    /// Show one FirecREST task
    Task {
        /// Task id
        id: String,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn init_logging(verbose: u8, config: Option<&ClientConfig>) {
    if config.is_some_and(|c| c.disable_client_logging) && verbose == 0 {
        return;
    }

    let filter = match verbose {
        0 => EnvFilter::new(config.map_or("warn", |c| c.log_level.as_str())),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: &ClientConfig, json: bool) -> anyhow::Result<()> {
    let client = common::create_client(config)?;

    match command {
        Commands::Services { name } => status::services(&client, name.as_deref(), json).await,
        Commands::Systems { name } => status::systems(&client, name.as_deref(), json).await,
        Commands::Parameters => status::parameters(&client).await,

        Commands::Ls {
            machine,
            path,
            all,
            recursive,
        } => ls::execute(&client, &machine, &path, all, recursive, json).await,

        Commands::Submit {
            machine,
            script,
            remote,
            account,
            env,
        } => {
            submit::execute(
                &client,
                &machine,
                &script,
                remote,
                account.as_deref(),
                env,
                json,
            )
            .await
        }

        Commands::Poll {
            machine,
            jobs: job_ids,
            start_time,
            end_time,
            page_size,
            page_number,
        } => {
            let query = firecrest_client::AccountingQuery {
                start_time,
                end_time,
                page_size,
                page_number,
            };
            jobs::poll(&client, &machine, &job_ids, &query, json).await
        }

        Commands::PollActive {
            machine,
            jobs: job_ids,
            page_size,
            page_number,
        } => jobs::poll_active(&client, &machine, &job_ids, page_size, page_number, json).await,

        Commands::Cancel { machine, job_id } => {
            jobs::cancel(&client, &machine, &job_id, json).await
        }

        Commands::Tasks { ids } => tasks::list(&client, &ids, json).await,

        Commands::Task { id } => tasks::show(&client, &id, json).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = common::load_config(cli.config.as_deref(), cli.url.as_deref());
    init_logging(cli.verbose, config.as_ref().ok());

    let result = match config {
        Ok(config) => run(cli.command, &config, cli.json).await,
        Err(e) => Err(e),
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let cli = Cli::try_parse_from(["firecrest", "services"]).unwrap();
        assert!(matches!(cli.command, Commands::Services { name: None }));
        assert_eq!(cli.verbose, 0);
        assert!(!cli.json);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "firecrest",
            "systems",
            "daint",
            "-vv",
            "--json",
            "--url",
            "https://firecrest.example.org",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.url.as_deref(), Some("https://firecrest.example.org"));
        match cli.command {
            Commands::Systems { name } => assert_eq!(name.as_deref(), Some("daint")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_submit_env() {
        let cli = Cli::try_parse_from([
            "firecrest",
            "submit",
            "daint",
            "job.sh",
            "--account",
            "proj01",
            "--env",
            "OMP_NUM_THREADS=4",
            "--env",
            "MODE=a=b",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                machine,
                script,
                remote,
                account,
                env,
            } => {
                assert_eq!(machine, "daint");
                assert_eq!(script, "job.sh");
                assert!(!remote);
                assert_eq!(account.as_deref(), Some("proj01"));
                assert_eq!(
                    env,
                    vec![
                        ("OMP_NUM_THREADS".to_string(), "4".to_string()),
                        ("MODE".to_string(), "a=b".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_submit_bad_env() {
        let result = Cli::try_parse_from(["firecrest", "submit", "daint", "job.sh", "--env", "NOVALUE"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_poll_active_jobs() {
        let cli = Cli::try_parse_from([
            "firecrest",
            "poll-active",
            "daint",
            "101",
            "102",
            "--page-size",
            "25",
        ])
        .unwrap();
        match cli.command {
            Commands::PollActive {
                jobs, page_size, ..
            } => {
                assert_eq!(jobs, vec!["101", "102"]);
                assert_eq!(page_size, Some(25));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ls_flags() {
        let cli = Cli::try_parse_from(["firecrest", "ls", "daint", "/scratch", "-a", "-R"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ls {
                all: true,
                recursive: true,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["firecrest"]).is_err());
        assert!(Cli::try_parse_from(["firecrest", "cancel", "daint"]).is_err());
    }
}
