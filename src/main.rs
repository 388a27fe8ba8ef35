mod cancel;
mod config;
mod dispatcher;
mod error;
mod export;
mod outcome;
mod pool;
mod report;
mod runner;
mod stats;

use std::sync::Arc;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cancel::CancelFlag;
use config::Cli;
use dispatcher::HttpConnector;
use export::SummaryExport;
use pool::ProgressFn;
use report::ProgressPrinter;
use runner::Runner;
use stats::LatencyHistogram;

fn main() -> Result<()> {
    // warn by default so the progress line stays readable
    tracing_subscriber
        ::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let csv_path = cli.csv.clone();
    let json_path = cli.json.clone();
    let config = Arc::new(cli.into_config().context("Invalid test configuration")?);

    // first Ctrl+C stops new work, the report is still generated
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc
        ::set_handler(move || {
            if handler_flag.cancel() {
                println!("\n\n[!] Interrupted! Generating report with collected data...\n");
            }
        })
        .context("Error setting Ctrl+C handler")?;

    report::print_configuration(&config);

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let printer = ProgressPrinter::new(config.total_requests);
    let progress: Arc<ProgressFn> = Arc::new(move |completed: usize| printer.update(completed));
    let connector = Arc::new(HttpConnector::new(Arc::clone(&config)));
    let runner = Runner::new(Arc::clone(&config), connector, cancel).with_progress(progress);

    let mut record = runtime.block_on(runner.run());
    drop(runtime);
    print!("\n\n");

    let terminal = record.start_reporting();
    info!(phase = ?terminal, outcomes = record.outcomes.len(), "run finished");

    let Some(stats) = stats::aggregate(&record) else {
        report::print_no_data();
        return Ok(());
    };
    let histogram = LatencyHistogram::from_outcomes(&record.outcomes);
    report::print_report(&stats, &histogram, config.summarize);

    if let Some(path) = csv_path {
        export
            ::write_results_csv(&path, &record.outcomes)
            .with_context(|| format!("Failed to save results to {}", path))?;
        println!("[+] Detailed results saved to: {}", path);
    }

    if let Some(path) = json_path {
        let summary = SummaryExport::new(&record, &stats, &histogram);
        export
            ::write_summary_json(&path, &summary)
            .with_context(|| format!("Failed to save summary to {}", path))?;
        println!("[+] Summary statistics saved to: {}", path);
    }

    Ok(())
}
