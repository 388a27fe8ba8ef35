use std::collections::HashSet;
use std::time::Duration;

use clap::Parser;
use isahc::http::{ HeaderName, HeaderValue, Method };
use thiserror::Error;
use url::Url;

// Defaults
const DEFAULT_REQUESTS: usize = 1000;
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Rejections raised before a run is allowed to start.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid HTTP method \"{0}\"")]
    InvalidMethod(String),

    #[error("Malformed header \"{0}\", expected \"Name: value\"")]
    MalformedHeader(String),

    #[error("Duplicate header \"{0}\"")]
    DuplicateHeader(String),

    #[error("{field} must be {requirement}")]
    OutOfRange { field: &'static str, requirement: &'static str },
}

/// Command line of the stress tester.
#[derive(Parser, Debug, Clone)]
#[command(name = "stressbench", version)]
#[command(about = "HTTP stress testing tool with batched load and cooldowns")]
#[command(
    after_help = "Examples:\n  stressbench http://localhost:5000/matmul -n 10000 -c 100\n  stressbench http://localhost:5000/matmul -n 10000 -c 100 --cooldown 1 --batch-size 1000\n  stressbench http://localhost:5000/api -n 1000 -c 50 -X POST --body '{\"key\":\"value\"}'"
)]
pub struct Cli {
    /// URL to test
    pub url: String,

    /// Total number of requests
    #[arg(short = 'n', long = "requests", default_value_t = DEFAULT_REQUESTS)]
    pub requests: usize,

    /// Number of concurrent workers per batch
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Request timeout
    #[arg(short, long, value_name = "SECONDS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Custom header, e.g. -H "Content-Type: application/json"
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Request body for methods that accept one
    #[arg(long)]
    pub body: Option<String>,

    /// Pause between batches
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub cooldown: f64,

    /// Requests per batch (default: all requests in one batch)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Disable HTTP keep-alive
    #[arg(long)]
    pub no_keep_alive: bool,

    /// Disable SSL certificate verification
    #[arg(long)]
    pub no_verify_ssl: bool,

    /// Number of runtime threads
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Save per-request results to a CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<String>,

    /// Save summary statistics to a JSON file
    #[arg(long, value_name = "FILE")]
    pub json: Option<String>,

    /// Summarize the output
    #[arg(short, long)]
    pub summarize: bool,
}

/// Validated, immutable input of one run.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub url: String,
    pub total_requests: usize,
    pub concurrency: usize, // workers per batch
    pub timeout: Duration, // whole request/response cycle including the body read
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub cooldown: Duration,
    pub batch_size: usize,
    pub keep_alive: bool,
    pub verify_ssl: bool,
    pub threads: usize,
    pub summarize: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<TestConfig, ConfigError> {
        if self.requests == 0 {
            return Err(ConfigError::OutOfRange {
                field: "requests",
                requirement: "greater than 0",
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "concurrency",
                requirement: "greater than 0",
            });
        }
        if self.threads == 0 {
            return Err(ConfigError::OutOfRange {
                field: "threads",
                requirement: "greater than 0",
            });
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "timeout",
                requirement: "a positive number of seconds",
            });
        }
        let timeout = Duration::try_from_secs_f64(self.timeout).map_err(|_| ConfigError::OutOfRange {
            field: "timeout",
            requirement: "a positive number of seconds",
        })?;
        if !self.cooldown.is_finite() || self.cooldown < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "cooldown",
                requirement: "zero or a positive number of seconds",
            });
        }
        let cooldown = Duration::try_from_secs_f64(self.cooldown).map_err(|_| ConfigError::OutOfRange {
            field: "cooldown",
            requirement: "zero or a positive number of seconds",
        })?;
        let batch_size = self.batch_size.unwrap_or(self.requests);
        if batch_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "batch-size",
                requirement: "greater than 0",
            });
        }

        Self::check_url(&self.url)?;

        let method_name = self.method.to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_|
            ConfigError::InvalidMethod(self.method.clone())
        )?;

        let mut headers = Vec::with_capacity(self.headers.len());
        let mut seen = HashSet::new();
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateHeader(name));
            }
            headers.push((name, value));
        }

        Ok(TestConfig {
            url: self.url,
            total_requests: self.requests,
            concurrency: self.concurrency,
            timeout,
            method,
            headers,
            body: self.body,
            cooldown,
            batch_size,
            keep_alive: !self.no_keep_alive,
            verify_ssl: !self.no_verify_ssl,
            threads: self.threads,
            summarize: self.summarize,
        })
    }

    fn check_url(url: &str) -> Result<(), ConfigError> {
        let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other =>
                Err(ConfigError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {}", other),
                }),
        }
    }
}

/// Split a `Name: value` header argument on its first colon.
/// Both halves must be valid HTTP, the client refuses to start otherwise.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let malformed = || ConfigError::MalformedHeader(raw.to_string());
    let (name, value) = raw.split_once(':').ok_or_else(malformed)?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() {
        return Err(malformed());
    }
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| malformed())?;
    HeaderValue::from_str(value).map_err(|_| malformed())?;
    Ok((name.to_string(), value.to_string()))
}

impl TestConfig {
    /// Number of batches, `ceil(total_requests / batch_size)`.
    pub fn batch_count(&self) -> usize {
        self.total_requests.div_ceil(self.batch_size)
    }

    /// Request ids belonging to batch `batch`.
    pub fn batch_range(&self, batch: usize) -> std::ops::Range<usize> {
        let start = (batch * self.batch_size).min(self.total_requests);
        let end = ((batch + 1) * self.batch_size).min(self.total_requests);
        start..end
    }

    /// Body to attach, dropped for methods that carry none.
    pub fn request_body(&self) -> Option<&str> {
        let bodiless = [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE];
        if bodiless.contains(&self.method) {
            None
        } else {
            self.body.as_deref()
        }
    }

    /// Connection limit for one batch session, leaves room for brief overlap.
    pub fn max_connections(&self) -> usize {
        self.concurrency.saturating_mul(2)
    }
}

/// Parse a command line straight into a config, for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_config(args: &[&str]) -> TestConfig {
    let mut full = vec!["stressbench"];
    full.extend_from_slice(args);
    Cli::try_parse_from(full).unwrap().into_config().unwrap()
}
