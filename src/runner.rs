use std::sync::Arc;
use std::time::{ Duration, SystemTime };

use tokio::time::{ Instant, sleep };
use tracing::{ debug, error, info, warn };

use crate::cancel::CancelFlag;
use crate::config::TestConfig;
use crate::dispatcher::Connector;
use crate::outcome::Outcome;
use crate::pool::{ OutcomeLog, ProgressFn, WorkerPool };

/// Lifecycle of one run. No phase is entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Reporting,
}

impl RunPhase {
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Running) |
                (Running, Completed) |
                (Running, Cancelled) |
                (Completed, Reporting) |
                (Cancelled, Reporting)
        )
    }
}

/// Frozen result of a run, handed to the statistics aggregator.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub config: Arc<TestConfig>,
    pub outcomes: Vec<Outcome>, // completion order
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub elapsed: Duration,
    pub phase: RunPhase,
}

impl RunRecord {
    /// Move to `Reporting`, returns the terminal phase the run ended in.
    pub fn start_reporting(&mut self) -> RunPhase {
        let terminal = self.phase;
        if terminal.can_transition_to(RunPhase::Reporting) {
            self.phase = RunPhase::Reporting;
        }
        terminal
    }

    pub fn was_cancelled(&self) -> bool {
        self.phase == RunPhase::Cancelled
    }
}

/// Batch scheduler: runs the configured request count as sequential batches,
/// each through a fresh session, with a cooldown in between.
pub struct Runner {
    config: Arc<TestConfig>,
    connector: Arc<dyn Connector>,
    cancel: CancelFlag,
    progress: Arc<ProgressFn>,
    phase: RunPhase,
}

impl Runner {
    /*------------------==| Public Functions |==-------------------------*/
    /// Create a new Runner instance
    pub fn new(config: Arc<TestConfig>, connector: Arc<dyn Connector>, cancel: CancelFlag) -> Self {
        Self {
            config,
            connector,
            cancel,
            progress: Arc::new(|_: usize| {}),
            phase: RunPhase::Idle,
        }
    }

    /// Callback invoked with 0 when the run starts, then with the completed
    /// count after every outcome
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every batch (or until cancelled) and freeze the collected outcomes
    pub async fn run(mut self) -> RunRecord {
        self.transition(RunPhase::Running);

        let config = Arc::clone(&self.config);
        let log = OutcomeLog::new();
        let pool = WorkerPool::new(config.concurrency, self.cancel.clone());
        let num_batches = config.batch_count();

        let started_at = SystemTime::now();
        let start = Instant::now();
        (self.progress)(0);

        for batch in 0..num_batches {
            if self.cancel.is_cancelled() {
                break;
            }

            let ids = config.batch_range(batch);
            if num_batches > 1 {
                println!("\n[Batch {}/{}] Requests {}-{}", batch + 1, num_batches, ids.start, ids.end);
            }
            info!(batch = batch + 1, num_batches, start = ids.start, end = ids.end, "starting batch");

            // the session lives for this batch only
            match self.connector.connect() {
                Ok(dispatcher) => {
                    let completed = pool.run(
                        dispatcher,
                        ids,
                        &log,
                        Arc::clone(&self.progress)
                    ).await;
                    info!(batch = batch + 1, completed, "batch finished");
                }
                Err(err) => {
                    error!(batch = batch + 1, error = %err, "could not open a session, skipping batch");
                }
            }

            let is_last = batch + 1 == num_batches;
            if !is_last && !config.cooldown.is_zero() && !self.cancel.is_cancelled() {
                self.cool_down().await;
            }
        }

        let elapsed = start.elapsed();
        let finished_at = SystemTime::now();
        debug!(collected = log.len(), elapsed_secs = elapsed.as_secs_f64(), "run loop exited");

        if self.cancel.is_cancelled() {
            self.transition(RunPhase::Cancelled);
        } else {
            self.transition(RunPhase::Completed);
        }

        RunRecord {
            config,
            outcomes: log.take(),
            started_at,
            finished_at,
            elapsed,
            phase: self.phase,
        }
    }

    /*-------------------==| Private/Helpers |==----------------------- */

    /// Sleep between batches, abandoned as soon as cancellation is requested
    async fn cool_down(&self) {
        let cooldown = self.config.cooldown;
        println!("\n[Cooldown] Waiting {:.1}s before next batch...", cooldown.as_secs_f64());
        info!(cooldown_secs = cooldown.as_secs_f64(), "cooling down");

        tokio::select! {
            _ = sleep(cooldown) => {}
            _ = self.cancel.cancelled() => {
                debug!("cooldown interrupted by cancellation");
            }
        }
    }

    fn transition(&mut self, next: RunPhase) {
        if self.phase.can_transition_to(next) {
            debug!(from = ?self.phase, to = ?next, "run phase changed");
            self.phase = next;
        } else {
            warn!(from = ?self.phase, to = ?next, "ignored invalid run phase transition");
        }
    }
}
