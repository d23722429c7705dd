pub mod access_token;
pub mod cancel;
pub mod error;
pub mod export;
pub mod import;
pub mod ledger;
pub mod matcher;
pub mod music_api;
pub mod retry;
pub mod source;
pub mod spotify;
pub mod submit;
pub mod utils;

use std::time::Duration;

use clap::Args;

use crate::retry::RetryPolicy;

// the binary flattens this into its own arguments
#[derive(Args, Debug, Clone)]
pub struct ImportConfig {
    /// Add matched tracks to liked songs. Without this flag the run is a dry
    /// run: matches are reported as `would_add` and nothing is modified
    #[arg(long, default_value = "false")]
    pub mutate: bool,

    /// Maximum number of catalog searches in flight
    #[arg(long, default_value_t = 4)]
    pub concurrency_limit: usize,

    /// Retries for a call failing with a timeout, network or server error
    #[arg(long, default_value_t = 3)]
    pub retry_budget: u32,

    /// Pause after a rate-limit response that does not say how long to wait
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub rate_limit_backoff: Duration,

    /// Rate-limit pauses tolerated for a single call before it is given up
    #[arg(long, default_value_t = 20)]
    pub max_rate_limit_waits: u32,

    /// Similarity score (0 to 1) a fuzzy match must exceed to be accepted
    #[arg(long, default_value_t = 0.85, value_parser = parse_threshold)]
    pub fuzzy_threshold: f64,

    /// Tracks per like request, capped by the service limit
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Timeout for each request to the service
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    /// Candidates requested per catalog search
    #[arg(long, default_value_t = 10)]
    pub search_limit: u32,

    /// Proxy to use for all requests in the format http://<ip>:<port>
    #[arg(long)]
    pub proxy: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            mutate: false,
            concurrency_limit: 4,
            retry_budget: 3,
            rate_limit_backoff: Duration::from_secs(30),
            max_rate_limit_waits: 20,
            fuzzy_threshold: 0.85,
            batch_size: 50,
            request_timeout: Duration::from_secs(15),
            search_limit: 10,
            proxy: None,
        }
    }
}

impl ImportConfig {
    pub fn dry_run(&self) -> bool {
        !self.mutate
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_budget: self.retry_budget,
            max_rate_limit_waits: self.max_rate_limit_waits,
            rate_limit_backoff: self.rate_limit_backoff,
            call_timeout: self.request_timeout,
            ..RetryPolicy::default()
        }
    }
}

/// `500ms`, `30s`, `2m`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration `{s}`"))?;
    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit `{other}` in `{s}`")),
    };
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration `{s}`: {e}"))
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("invalid threshold `{s}`"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold must be between 0 and 1, got {value}"))
    }
}
