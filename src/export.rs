use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{ DateTime, Local, SecondsFormat };
use serde::Serialize;
use tracing::info;

use crate::config::TestConfig;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::runner::RunRecord;
use crate::stats::{ self, LatencyHistogram, TestStats, ThroughputBucket };

const CSV_HEADER: &str =
    "Request_ID,Success,Status_Code,Response_Time_ms,Timestamp,Response_Size_bytes,Error";

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// One row per outcome, in collection order. `Request_ID` is the 1-based row index,
/// timestamps keep microsecond precision.
pub fn results_csv(outcomes: &[Outcome]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + outcomes.len() * 64);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for (i, outcome) in outcomes.iter().enumerate() {
        out.push_str(
            &format!(
                "{},{},{},{:.2},{:.6},{},{}\n",
                i + 1,
                outcome.success,
                outcome.status_code,
                outcome.response_time_ms(),
                outcome.start_timestamp,
                outcome.response_size_bytes,
                escape_csv(&outcome.error_message)
            )
        );
    }
    out
}

pub fn write_results_csv(path: impl AsRef<Path>, outcomes: &[Outcome]) -> Result<()> {
    fs::write(path.as_ref(), results_csv(outcomes))?;
    info!(path = %path.as_ref().display(), rows = outcomes.len(), "wrote results csv");
    Ok(())
}

// quote fields carrying separators, quotes or line breaks
fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ---------------------------------------------------------------------------
// JSON summary
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ConfigExport {
    pub url: String,
    pub total_requests: usize,
    pub concurrency: usize,
    pub method: String,
    pub timeout: f64,
    pub cooldown: f64,
    pub batch_size: usize,
    pub keep_alive: bool,
    pub verify_ssl: bool,
}

impl From<&TestConfig> for ConfigExport {
    fn from(config: &TestConfig) -> Self {
        Self {
            url: config.url.clone(),
            total_requests: config.total_requests,
            concurrency: config.concurrency,
            method: config.method.to_string(),
            timeout: config.timeout.as_secs_f64(),
            cooldown: config.cooldown.as_secs_f64(),
            batch_size: config.batch_size,
            keep_alive: config.keep_alive,
            verify_ssl: config.verify_ssl,
        }
    }
}

/// Configuration plus full statistics of one run.
#[derive(Debug, Serialize)]
pub struct SummaryExport<'a> {
    pub test_config: ConfigExport,
    pub stats: &'a TestStats,
    pub latency_distribution: &'a LatencyHistogram,
    pub throughput_timeline: Vec<ThroughputBucket>,
    pub latency_trend: Vec<f64>,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
    pub timestamp: String, // generation time, RFC 3339
}

impl<'a> SummaryExport<'a> {
    pub fn new(record: &RunRecord, stats: &'a TestStats, histogram: &'a LatencyHistogram) -> Self {
        Self {
            test_config: ConfigExport::from(record.config.as_ref()),
            stats,
            latency_distribution: histogram,
            throughput_timeline: stats::throughput_timeline(&record.outcomes),
            latency_trend: stats::latency_trend(&record.outcomes),
            cancelled: record.was_cancelled(),
            started_at: rfc3339(record.started_at),
            finished_at: rfc3339(record.finished_at),
            timestamp: rfc3339(SystemTime::now()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn rfc3339(at: SystemTime) -> String {
    DateTime::<Local>::from(at).to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub fn write_summary_json(path: impl AsRef<Path>, summary: &SummaryExport<'_>) -> Result<()> {
    fs::write(path.as_ref(), summary.to_json()?)?;
    info!(path = %path.as_ref().display(), "wrote summary json");
    Ok(())
}
