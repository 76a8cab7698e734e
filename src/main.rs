//! Entry point for the dirdrop CLI.
//!
//! Drains a queue root into an HTTP endpoint. Exit status is 0 when every
//! task was delivered, 1 when some delivery failed, and 2 when the run was
//! aborted by an error.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dirdrop::{Cli, DeliveryError, DirQueue, Disposition, Poster, QueueRoot};

const EXIT_UNDELIVERED: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli);

    match run(&cli).await {
        Ok(errors) if errors.is_empty() => ExitCode::SUCCESS,
        Ok(errors) => {
            for e in &errors {
                eprintln!("{}", e);
            }
            ExitCode::from(EXIT_UNDELIVERED)
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Post every task under the root; returns the delivery errors collected.
async fn run(cli: &Cli) -> Result<Vec<DeliveryError>> {
    let meta = tokio::fs::metadata(&cli.data_dir)
        .await
        .with_context(|| format!("cannot access queue root '{}'", cli.data_dir.display()))?;
    if !meta.is_dir() {
        bail!("queue root '{}' is not a directory", cli.data_dir.display());
    }

    let mut queue =
        DirQueue::new(QueueRoot::new(&cli.data_dir)).with_policy(cli.push_back_policy());
    let mut poster = Poster::new(cli.url.clone(), cli.request_timeout(), cli.retries)
        .context("failed to build HTTP client")?;

    info!(root = %cli.data_dir.display(), url = %poster.url(), "draining queue");

    while let Some(task) = queue.next_task().await? {
        let name = task.name().to_string();
        // A read failure ends the run with the entry left in doing.
        let delivered = poster.post(&name, task).await?;

        let disposition = if delivered {
            Disposition::Completed
        } else {
            Disposition::PushBack
        };
        queue.settle(disposition).await?;
    }

    let stats = queue.stats();
    info!(
        claimed = stats.claimed,
        tasks = stats.tasks,
        done = stats.done,
        pushed_back = stats.pushed_back,
        "run finished"
    );

    Ok(poster.take_errors())
}

fn setup_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
