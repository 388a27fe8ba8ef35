use std::ops::Range;
use std::sync::{ Arc, Mutex, PoisonError };
use std::time::Duration;

use tokio::time::timeout;
use tracing::{ debug, error, trace };

use crate::cancel::CancelFlag;
use crate::dispatcher::Dispatcher;
use crate::outcome::Outcome;

/// How long a worker waits on the queue before re-checking cancellation.
pub const QUEUE_POLL: Duration = Duration::from_millis(100);

/// Progress callback, receives the total number of collected outcomes.
pub type ProgressFn = dyn Fn(usize) + Send + Sync;

/// Append-only outcome collection shared by all workers of a run.
/// Order is completion order, not dispatch order.
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one outcome and report the new total while still holding the lock,
    /// so progress counts arrive strictly increasing.
    pub fn record(&self, outcome: Outcome, progress: &ProgressFn) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes.push(outcome);
        progress(outcomes.len());
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Move every collected outcome out, leaving the log empty.
    pub fn take(&self) -> Vec<Outcome> {
        std::mem::take(&mut *self.outcomes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Fixed number of workers draining one batch's queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: CancelFlag,
}

impl WorkerPool {
    pub fn new(concurrency: usize, cancel: CancelFlag) -> Self {
        Self { concurrency: concurrency.max(1), cancel }
    }

    /// Dispatch every id in `ids` and wait for the workers to finish.
    ///
    /// Returns once each id produced exactly one outcome, or once cancellation
    /// was observed and the in-flight requests completed. Ids never dequeued are
    /// dropped. Returns the number of outcomes this batch added.
    pub async fn run(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        ids: Range<usize>,
        log: &OutcomeLog,
        progress: Arc<ProgressFn>
    ) -> usize {
        let batch_len = ids.len();
        if batch_len == 0 {
            return 0;
        }

        let (queue_tx, queue_rx) = flume::bounded(batch_len);
        for request_id in ids {
            // capacity equals the batch length, never blocks
            if queue_tx.try_send(request_id).is_err() {
                break;
            }
        }
        // workers see a disconnected queue once it is drained
        drop(queue_tx);

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            handles.push(
                tokio::spawn(
                    Self::work(
                        worker_id,
                        Arc::clone(&dispatcher),
                        queue_rx.clone(),
                        log.clone(),
                        Arc::clone(&progress),
                        self.cancel.clone()
                    )
                )
            );
        }
        drop(queue_rx);

        let mut completed = 0;
        for handle in handles {
            match handle.await {
                Ok(handled) => {
                    completed += handled;
                }
                Err(err) => error!(error = %err, "worker task failed"),
            }
        }
        completed
    }

    async fn work(
        worker_id: usize,
        dispatcher: Arc<dyn Dispatcher>,
        queue: flume::Receiver<usize>,
        log: OutcomeLog,
        progress: Arc<ProgressFn>,
        cancel: CancelFlag
    ) -> usize {
        let mut handled = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(worker_id, handled, "worker stopping on cancellation");
                break;
            }
            match timeout(QUEUE_POLL, queue.recv_async()).await {
                Ok(Ok(request_id)) => {
                    let outcome = dispatcher.dispatch(request_id).await;
                    log.record(outcome, progress.as_ref());
                    handled += 1;
                }
                // drained
                Ok(Err(_)) => {
                    break;
                }
                Err(_) => {
                    continue;
                }
            }
        }
        trace!(worker_id, handled, "worker finished");
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ DispatchFuture, mock::MockDispatcher };
    use crate::outcome::{ DispatchError, epoch_seconds };
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::time::SystemTime;

    fn no_progress() -> Arc<ProgressFn> {
        Arc::new(|_: usize| {})
    }

    /// Tracks how many dispatches overlap
    struct GaugedDispatcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Dispatcher for GaugedDispatcher {
        fn dispatch(&self, _request_id: usize) -> DispatchFuture<'_> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Outcome::failed(
                    DispatchError::Unclassified("gauge".into()),
                    Duration::from_millis(20),
                    epoch_seconds(SystemTime::now())
                )
            })
        }
    }

    #[tokio::test]
    async fn test_every_id_produces_one_outcome() {
        let dispatcher = Arc::new(MockDispatcher::new(Duration::from_millis(50)));
        let pool = WorkerPool::new(10, CancelFlag::new());
        let log = OutcomeLog::new();

        let completed = pool.run(dispatcher.clone(), 0..100, &log, no_progress()).await;

        assert_eq!(completed, 100);
        assert_eq!(log.len(), 100);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let dispatcher = Arc::new(GaugedDispatcher {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = WorkerPool::new(5, CancelFlag::new());
        let log = OutcomeLog::new();

        pool.run(dispatcher.clone(), 0..50, &log, no_progress()).await;

        let peak = dispatcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak in-flight {} exceeds concurrency", peak);
        assert!(peak > 1, "requests never overlapped");
        assert_eq!(log.len(), 50);
    }

    #[tokio::test]
    async fn test_progress_counts_are_strictly_increasing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let progress: Arc<ProgressFn> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |completed: usize| seen.lock().unwrap().push(completed))
        };
        let pool = WorkerPool::new(4, CancelFlag::new());
        let log = OutcomeLog::new();

        pool.run(Arc::new(MockDispatcher::new(Duration::ZERO)), 0..40, &log, progress).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let dispatcher = Arc::new(MockDispatcher::new(Duration::ZERO));
        let log = OutcomeLog::new();

        let completed = WorkerPool::new(8, cancel).run(
            dispatcher.clone(),
            0..20,
            &log,
            no_progress()
        ).await;

        assert_eq!(completed, 0);
        assert_eq!(log.len(), 0);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_batch_keeps_in_flight_outcomes() {
        let mut mock = MockDispatcher::new(Duration::from_millis(20));
        mock.delay = Duration::from_millis(20);
        let dispatcher = Arc::new(mock);
        let cancel = CancelFlag::new();
        let log = OutcomeLog::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(70)).await;
                cancel.cancel();
            })
        };

        let completed = WorkerPool::new(2, cancel).run(
            dispatcher.clone(),
            0..200,
            &log,
            no_progress()
        ).await;
        canceller.await.unwrap();

        let outcomes = log.take();
        assert!(completed < 200);
        assert_eq!(outcomes.len(), completed);
        // every started attempt finished and was recorded
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), outcomes.len());
        for outcome in &outcomes {
            assert!(outcome.success);
            assert!(outcome.error_message.is_empty());
        }
    }

    #[test]
    fn test_take_empties_the_log() {
        let log = OutcomeLog::new();
        let outcome = Outcome::failed(DispatchError::Timeout, Duration::ZERO, 0.0);
        log.record(outcome.clone(), &|_: usize| {});
        log.record(outcome, &|_: usize| {});
        assert_eq!(log.take().len(), 2);
        assert_eq!(log.len(), 0);
    }
}
