use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::outcome::Outcome;
use crate::runner::RunRecord;

/// Fixed latency ranges, upper bounds exclusive, in milliseconds.
const LATENCY_RANGES: [(&str, f64); 9] = [
    ("<10ms", 10.0),
    ("10-50ms", 50.0),
    ("50-100ms", 100.0),
    ("100-200ms", 200.0),
    ("200-500ms", 500.0),
    ("500ms-1s", 1000.0),
    ("1-2s", 2000.0),
    ("2-5s", 5000.0),
    (">5s", f64::INFINITY),
];

/// Minimum number of throughput buckets and smoothing window.
const MIN_TIMELINE_BUCKETS: usize = 10;
const MIN_SMOOTHING_WINDOW: usize = 10;

/// Aggregated test statistics. Latencies are in milliseconds, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestStats {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_time: f64,
    pub requests_per_second: f64,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub median_response_time: f64,
    pub p95_response_time: f64,
    pub p99_response_time: f64,
    pub total_data_transferred: u64, // bytes, successful requests only
    pub status_codes: BTreeMap<u16, usize>, // includes 0 for "no response"
    pub errors: BTreeMap<String, usize>,
}

/// Statistics of a finished (or cancelled) run, `None` when nothing was collected.
pub fn aggregate(record: &RunRecord) -> Option<TestStats> {
    TestStats::compute(&record.outcomes, record.elapsed)
}

impl TestStats {
    /// Reduce an outcome sequence. Recomputed in full on every call.
    pub fn compute(outcomes: &[Outcome], total_time: Duration) -> Option<Self> {
        if outcomes.is_empty() {
            return None;
        }

        let mut latencies: Vec<f64> = outcomes.iter().map(Outcome::response_time_ms).collect();
        latencies.sort_by(f64::total_cmp);

        let mut status_codes = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut successful_requests = 0;
        let mut total_data_transferred = 0;
        for outcome in outcomes {
            *status_codes.entry(outcome.status_code).or_insert(0) += 1;
            if outcome.success {
                successful_requests += 1;
                total_data_transferred += outcome.response_size_bytes;
            } else {
                *errors.entry(outcome.error_message.clone()).or_insert(0) += 1;
            }
        }

        let total_requests = outcomes.len();
        let total_time = total_time.as_secs_f64();
        let requests_per_second = if total_time > 0.0 {
            (total_requests as f64) / total_time
        } else {
            0.0
        };

        Some(TestStats {
            total_requests,
            successful_requests,
            failed_requests: total_requests - successful_requests,
            total_time,
            requests_per_second,
            avg_response_time: latencies.iter().sum::<f64>() / (total_requests as f64),
            min_response_time: latencies[0],
            max_response_time: latencies[total_requests - 1],
            median_response_time: percentile(&latencies, 0.5),
            p95_response_time: percentile(&latencies, 0.95),
            p99_response_time: percentile(&latencies, 0.99),
            total_data_transferred,
            status_codes,
            errors,
        })
    }

    pub fn success_rate(&self) -> f64 {
        (self.successful_requests as f64) / (self.total_requests as f64) * 100.0
    }
}

/// Linearly interpolated percentile of ascending `sorted`, `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let k = ((sorted.len() - 1) as f64) * p.clamp(0.0, 1.0);
    let floor = k.floor() as usize;
    let frac = k - (floor as f64);
    if floor + 1 >= sorted.len() {
        return sorted[sorted.len() - 1];
    }
    sorted[floor] + frac * (sorted[floor + 1] - sorted[floor])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyBucket {
    pub range: &'static str,
    pub count: usize,
}

/// Outcomes counted into the nine fixed latency ranges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyHistogram {
    pub buckets: Vec<LatencyBucket>,
}

impl LatencyHistogram {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let mut buckets: Vec<LatencyBucket> = LATENCY_RANGES.iter()
            .map(|&(range, _)| LatencyBucket { range, count: 0 })
            .collect();

        for outcome in outcomes {
            let ms = outcome.response_time_ms();
            let idx = LATENCY_RANGES.iter()
                .position(|&(_, upper)| ms < upper)
                .unwrap_or(LATENCY_RANGES.len() - 1);
            buckets[idx].count += 1;
        }

        Self { buckets }
    }

    pub fn total(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.count)
            .sum()
    }

    pub fn max_count(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.count)
            .max()
            .unwrap_or(0)
    }
}

/// Request rate in one slice of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputBucket {
    pub offset_secs: f64, // bucket midpoint, relative to the first request
    pub requests: usize,
    pub requests_per_second: f64,
    pub successful_per_second: f64,
}

/// Requests per second over time, bucketed by request start timestamp into
/// `max(floor(span), 10)` equal slices of the observed span.
pub fn throughput_timeline(outcomes: &[Outcome]) -> Vec<ThroughputBucket> {
    if outcomes.is_empty() {
        return Vec::new();
    }

    let start = outcomes
        .iter()
        .map(|o| o.start_timestamp)
        .fold(f64::INFINITY, f64::min);
    let end = outcomes
        .iter()
        .map(|o| o.start_timestamp)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = end - start;
    let num_buckets = (span.floor() as usize).max(MIN_TIMELINE_BUCKETS);
    let bucket_size = span / (num_buckets as f64);

    let mut totals = vec![0usize; num_buckets];
    let mut successes = vec![0usize; num_buckets];
    for outcome in outcomes {
        let idx = if bucket_size > 0.0 {
            (((outcome.start_timestamp - start) / bucket_size) as usize).min(num_buckets - 1)
        } else {
            0
        };
        totals[idx] += 1;
        if outcome.success {
            successes[idx] += 1;
        }
    }

    let rate = |count: usize| {
        if bucket_size > 0.0 { (count as f64) / bucket_size } else { 0.0 }
    };

    (0..num_buckets)
        .map(|i| ThroughputBucket {
            offset_secs: (i as f64) * bucket_size + bucket_size / 2.0,
            requests: totals[i],
            requests_per_second: rate(totals[i]),
            successful_per_second: rate(successes[i]),
        })
        .collect()
}

/// Smoothing window for `n` samples, `max(n / 100, 10)`.
pub fn smoothing_window(n: usize) -> usize {
    (n / 100).max(MIN_SMOOTHING_WINDOW)
}

/// Simple moving average over full windows only, yields `len - window + 1` values.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / (window as f64))
        .collect()
}

/// Smoothed latency trend (ms) in completion order.
pub fn latency_trend(outcomes: &[Outcome]) -> Vec<f64> {
    let latencies: Vec<f64> = outcomes.iter().map(Outcome::response_time_ms).collect();
    moving_average(&latencies, smoothing_window(latencies.len()))
}
