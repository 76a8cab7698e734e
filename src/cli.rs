use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::PushBackPolicy;

#[derive(Parser, Debug)]
#[command(name = "dirdrop")]
#[command(version)]
#[command(about = "POST files queued in a directory tree to a web service", long_about = None)]
#[command(after_help = "Files under PATH/todo are claimed into PATH/doing, posted one by one\n\
  (zip archives member by member) and moved to PATH/done once accepted.\n\
  Files whose delivery fails go back to PATH/todo.\n\n\
Examples:\n  \
  dirdrop /var/spool/drop https://api.example.com/ingest\n  \
  dirdrop -v --stop-on-failure ./queue http://localhost:8080/upload")]
pub struct Cli {
    /// Root directory containing `todo`, `doing` and `done`
    #[arg(value_name = "PATH")]
    pub data_dir: PathBuf,

    /// URL to send POST requests to
    #[arg(value_name = "URL", value_parser = parse_url)]
    pub url: Url,

    /// End the run at the first task that fails to deliver
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout: u64,

    /// Retries for requests that fail to connect
    #[arg(long, default_value_t = 3, value_name = "NUM")]
    pub retries: u32,

    /// More log output (-vv => trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Less log output
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn push_back_policy(&self) -> PushBackPolicy {
        if self.stop_on_failure {
            PushBackPolicy::Stop
        } else {
            PushBackPolicy::Continue
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Default tracing filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet > 0 {
            return "dirdrop=warn,warn";
        }
        match self.verbose {
            0 => "dirdrop=info,warn",
            1 => "dirdrop=debug,warn",
            _ => "dirdrop=trace,info",
        }
    }
}

fn parse_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| format!("invalid URL '{s}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported URL scheme '{other}'")),
    }
}
