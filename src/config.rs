use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::buffer::EvictionPolicy;
use crate::follow::FOLLOW_PROXIMITY;
use crate::record::Level;

/// Default maximum number of records kept in the buffer
pub const DEFAULT_MAX_BUFFER: usize = 2000;
/// The server holds a long-poll for 60s; leave it room to answer first
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 65;
/// Fixed delay before a failed poll is retried
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Capacity of the poll completion channel
pub const DEFAULT_CHANNEL_BUFFER: usize = 16;

/// Command line for longtail
#[derive(Parser, Debug)]
#[command(name = "longtail", version, about = "Live-tail a long-poll JSON log stream")]
pub struct Cli {
    /// Base URL the web log is served on, e.g. http://localhost:8080/logs/
    #[arg(env = "LONGTAIL_ENDPOINT")]
    pub endpoint: String,

    /// Maximum number of records kept in memory
    #[arg(long, env = "LONGTAIL_MAX_BUFFER", default_value_t = DEFAULT_MAX_BUFFER,
          value_parser = parse_max_buffer)]
    pub max_buffer: usize,

    /// Seconds before an outstanding poll is abandoned and retried
    #[arg(long, env = "LONGTAIL_POLL_TIMEOUT", default_value_t = DEFAULT_POLL_TIMEOUT_SECS)]
    pub poll_timeout: u64,

    /// What survives when the buffer overflows
    #[arg(long, value_enum, env = "LONGTAIL_EVICTION", default_value_t = EvictionPolicy::Strict)]
    pub eviction: EvictionPolicy,

    /// Severity threshold for this run, instead of the saved one
    #[arg(long, value_enum)]
    pub level: Option<Level>,

    /// Preferences file (defaults to the user config directory)
    #[arg(long, env = "LONGTAIL_PREFS")]
    pub prefs: Option<PathBuf>,

    /// Write diagnostics to this file (filter with LONGTAIL_LOG)
    #[arg(long, env = "LONGTAIL_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the records currently buffered by the server and exit
    #[arg(long)]
    pub dump: bool,

    /// Highlight this term in --dump output
    #[arg(long, requires = "dump")]
    pub search: Option<String>,

    /// Treat --search as a regular expression
    #[arg(long, requires = "search")]
    pub regex: bool,
}

fn parse_max_buffer(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|e| format!("{}", e))?;
    if value == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(value)
}

/// Engine configuration for one session
#[derive(Clone, Debug)]
pub struct Config {
    pub endpoint: String,
    /// Maximum number of records to keep in the buffer
    pub max_buffer: usize,
    pub poll_timeout: Duration,
    pub retry_delay: Duration,
    pub eviction: EvictionPolicy,
    /// Units from the bottom that re-enable following
    pub follow_proximity: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            retry_delay: RETRY_DELAY,
            eviction: EvictionPolicy::Strict,
            follow_proximity: FOLLOW_PROXIMITY,
        }
    }
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            endpoint: cli.endpoint.clone(),
            max_buffer: cli.max_buffer,
            poll_timeout: Duration::from_secs(cli.poll_timeout),
            eviction: cli.eviction,
            ..Self::default()
        }
    }
}
