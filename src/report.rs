use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use crate::config::TestConfig;
use crate::stats::{ LatencyHistogram, TestStats };

const FIELD_WIDTH: usize = 23; //  width of each label for formatting print
const RULE_WIDTH: usize = 70;
const PROGRESS_BAR_WIDTH: usize = 50;
const HISTOGRAM_BAR_WIDTH: usize = 50;

/// Live progress line: bar, percent, completed/total and current RPS.
#[derive(Debug)]
pub struct ProgressPrinter {
    total: usize,
    start: OnceLock<Instant>, // set by the first update, the run announces itself with 0
}

impl ProgressPrinter {
    pub fn new(total: usize) -> Self {
        Self { total, start: OnceLock::new() }
    }

    pub fn update(&self, completed: usize) {
        let start = self.start.get_or_init(Instant::now);
        let line = self.render(completed, start.elapsed().as_secs_f64());
        print!("\r{}", line); // move to the start of line and print
        let _ = std::io::stdout().flush(); // ensure the output is displayed immediately
    }

    fn render(&self, completed: usize, elapsed_secs: f64) -> String {
        let total = self.total.max(1);
        let progress = (completed as f64) / (total as f64) * 100.0;
        let filled = (PROGRESS_BAR_WIDTH * completed / total).min(PROGRESS_BAR_WIDTH);
        let bar = format!("{}{}", "█".repeat(filled), "░".repeat(PROGRESS_BAR_WIDTH - filled));
        let current_rps = if elapsed_secs > 0.0 { (completed as f64) / elapsed_secs } else { 0.0 };

        format!("[{}] {:.1}% | {}/{} | {:.0} RPS", bar, progress, completed, self.total, current_rps)
    }
}

/// Banner printed before the run starts
pub fn print_configuration(config: &TestConfig) {
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("STRESS TEST CONFIGURATION");
    println!("{}", "=".repeat(RULE_WIDTH));
    print_field("Target URL:", &config.url);
    print_field("Total Requests:", &config.total_requests.to_string());
    print_field("Concurrency:", &config.concurrency.to_string());
    print_field("Method:", config.method.as_str());
    print_field("Timeout:", &format!("{}s", config.timeout.as_secs_f64()));
    print_field("Keep-Alive:", &config.keep_alive.to_string());
    print_field("Batch Size:", &config.batch_size.to_string());
    if !config.cooldown.is_zero() {
        print_field(
            "Cooldown:",
            &format!("{}s between batches", config.cooldown.as_secs_f64())
        );
    }
    println!("{}", "=".repeat(RULE_WIDTH));
    println!();
}

/// Print the benchmarking report
pub fn print_report(stats: &TestStats, histogram: &LatencyHistogram, summarize: bool) {
    if summarize {
        print_summarized_report(stats);
    } else {
        print_full_report(stats, histogram);
    }
}

/// Printed instead of a report when no outcome was collected
pub fn print_no_data() {
    println!("[!] No results collected");
}

fn print_summarized_report(stats: &TestStats) {
    println!(
        "Sent {} requests in {:.2}s, {} read",
        stats.total_requests,
        stats.total_time,
        format_bytes(stats.total_data_transferred)
    );
    if stats.failed_requests > 0 {
        println!(
            "Failed Requests: {}, out of which timeouts {}",
            stats.failed_requests,
            stats.errors.get("Timeout").copied().unwrap_or(0)
        );
    }
    println!(" {:<10} {:<10} {:<10} {:<10}", "Avg", "Median", "p95", "p99");
    println!(
        " {:<10} {:<10} {:<10} {:<10}",
        format_latency(stats.avg_response_time),
        format_latency(stats.median_response_time),
        format_latency(stats.p95_response_time),
        format_latency(stats.p99_response_time)
    );
    println!("{:<20} {:>7.2}", "Request(s) per sec:", stats.requests_per_second);
}

fn print_full_report(stats: &TestStats, histogram: &LatencyHistogram) {
    println!("{}", "=".repeat(RULE_WIDTH));
    println!("TEST RESULTS");
    println!("{}", "=".repeat(RULE_WIDTH));
    println!();

    print_summary(stats);
    print_response_times(stats);
    print_status_codes(stats);
    print_errors(stats);

    println!("{}", "=".repeat(RULE_WIDTH));
    print_latency_distribution(histogram);
}

fn print_summary(stats: &TestStats) {
    let total = stats.total_requests as f64;
    section("SUMMARY");
    print_field("Total Requests:", &stats.total_requests.to_string());
    print_field(
        "Successful:",
        &format!("{} ({:.1}%)", stats.successful_requests, stats.success_rate())
    );
    print_field(
        "Failed:",
        &format!("{} ({:.1}%)", stats.failed_requests, (stats.failed_requests as f64) / total * 100.0)
    );
    print_field("Total Time:", &format!("{:.2}s", stats.total_time));
    print_field("Requests per Second:", &format!("{:.2}", stats.requests_per_second));
    print_field("Data Transferred:", &format_bytes(stats.total_data_transferred));
    println!();
}

fn print_response_times(stats: &TestStats) {
    section("RESPONSE TIMES (milliseconds)");
    print_field("Average:", &format!("{:.2} ms", stats.avg_response_time));
    print_field("Median:", &format!("{:.2} ms", stats.median_response_time));
    print_field("Min:", &format!("{:.2} ms", stats.min_response_time));
    print_field("Max:", &format!("{:.2} ms", stats.max_response_time));
    print_field("95th Percentile:", &format!("{:.2} ms", stats.p95_response_time));
    print_field("99th Percentile:", &format!("{:.2} ms", stats.p99_response_time));
    println!();
}

fn print_status_codes(stats: &TestStats) {
    section("STATUS CODES");
    for (code, count) in &stats.status_codes {
        let percentage = (*count as f64) / (stats.total_requests as f64) * 100.0;
        println!("{} {:<20} {} ({:.1}%)", code, status_description(*code), count, percentage);
    }
    println!();
}

fn print_errors(stats: &TestStats) {
    if stats.errors.is_empty() {
        return;
    }
    section("ERRORS");

    // most frequent first
    let mut errors: Vec<(&String, &usize)> = stats.errors.iter().collect();
    errors.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    for (error, count) in errors {
        let percentage = if stats.failed_requests > 0 {
            (*count as f64) / (stats.failed_requests as f64) * 100.0
        } else {
            0.0
        };
        println!("{:<40} {} ({:.1}%)", error, count, percentage);
    }
    println!();
}

fn print_latency_distribution(histogram: &LatencyHistogram) {
    let total = histogram.total();
    let max_count = histogram.max_count().max(1);

    section("LATENCY DISTRIBUTION");
    for bucket in &histogram.buckets {
        let percentage = if total > 0 { (bucket.count as f64) / (total as f64) * 100.0 } else { 0.0 };
        let bar = "█".repeat((bucket.count * HISTOGRAM_BAR_WIDTH) / max_count);
        println!(
            "{:<12} {:<bar_width$} {:>6} ({:>5.1}%)",
            bucket.range,
            bar,
            bucket.count,
            percentage,
            bar_width = HISTOGRAM_BAR_WIDTH
        );
    }
    println!();
}

fn section(title: &str) {
    println!("{}", title);
    println!("{}", "-".repeat(RULE_WIDTH));
}

fn print_field(label: &str, value: &str) {
    println!("{:<field_width$}{}", label, value, field_width = FIELD_WIDTH);
}

// convert into seconds if the value is greater than 1000ms
fn format_latency(value: f64) -> String {
    if value > 1000.0 {
        format!("{:.2}s", value / 1000.0) // convert to seconds
    } else {
        format!("{:.2}ms", value) // keep in milliseconds
    }
}

/// Human readable byte count
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{:.2} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.2} TB", value)
}

pub fn status_description(code: u16) -> &'static str {
    match code {
        0 => "Connection Failed",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2.00 TB");
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(12.346), "12.35ms");
        assert_eq!(format_latency(2500.0), "2.50s");
    }

    #[test]
    fn test_status_description() {
        assert_eq!(status_description(0), "Connection Failed");
        assert_eq!(status_description(429), "Too Many Requests");
        assert_eq!(status_description(418), "");
    }

    #[test]
    fn test_progress_line() {
        let printer = ProgressPrinter::new(200);
        let line = printer.render(50, 2.0);
        assert!(line.starts_with(&format!("[{}{}]", "█".repeat(12), "░".repeat(38))));
        assert!(line.ends_with("25.0% | 50/200 | 25 RPS"), "{}", line);

        let done = printer.render(200, 0.0);
        assert!(done.contains("100.0% | 200/200 | 0 RPS"), "{}", done);
    }

    #[test]
    fn test_progress_clock_starts_with_first_update() {
        let printer = ProgressPrinter::new(10);
        assert!(printer.start.get().is_none());

        printer.update(0);
        let first = *printer.start.get().unwrap();
        printer.update(1);
        assert_eq!(*printer.start.get().unwrap(), first);
    }
}
