//! Bounded fan-out of chunk work with per-chunk retry
//!
//! Every chunk of a document shares one admission gate. Chunks are admitted
//! in index order as permits free up, and a chunk keeps its permit through
//! its retries and backoff delays so the number of chunks being worked on
//! never exceeds the configured limit. Results are collected per chunk and
//! returned in index order regardless of completion order.

use crate::config::PipelineOptions;
use crate::error::DispatchError;
use crate::progress::{ChunkStatus, ProgressTracker};
use crate::types::ChunkOutcome;
use fieldwise_domain::Chunk;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info_span, warn, Instrument};

/// A chunk whose processing succeeded
#[derive(Debug)]
pub struct ChunkSuccess<T> {
    /// Chunk index
    pub index: usize,
    /// Attempts used, the successful one included
    pub attempts: u32,
    /// Processing result
    pub value: T,
}

/// A chunk that failed for good
#[derive(Debug)]
pub struct ChunkFailure {
    /// Chunk index
    pub index: usize,
    /// Attempts made
    pub attempts: u32,
    /// Why it failed
    pub error: DispatchError,
}

impl ChunkFailure {
    /// The error from the final attempt
    pub fn last_error(&self) -> &DispatchError {
        match &self.error {
            DispatchError::Exhausted { last, .. } => last,
            other => other,
        }
    }
}

/// Everything the dispatcher learned about one run
#[derive(Debug)]
pub struct DispatchReport<T> {
    /// Successful chunks, in index order
    pub completed: Vec<ChunkSuccess<T>>,
    /// Failed chunks, in index order
    pub failed: Vec<ChunkFailure>,
    /// Chunks cut off by the deadline, in index order
    pub abandoned: Vec<usize>,
    /// Whether the deadline expired before all chunks finished
    pub timed_out: bool,
    /// Final state of every chunk, in index order
    pub outcomes: Vec<ChunkOutcome>,
}

/// Runs a processing function over chunks under bounded concurrency
pub struct Dispatcher {
    max_concurrency: usize,
    retry_attempts: u32,
    base_delay: Duration,
    progress: ProgressTracker,
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// `max_concurrency` and `retry_attempts` are clamped to at least 1.
    pub fn new(max_concurrency: usize, retry_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            retry_attempts: retry_attempts.max(1),
            base_delay,
            progress: ProgressTracker::new(),
        }
    }

    /// Create a dispatcher from pipeline options
    pub fn from_options(options: &PipelineOptions) -> Self {
        Self::new(
            options.max_concurrency,
            options.retry_attempts,
            options.retry_base_delay(),
        )
    }

    /// Report status transitions to `tracker`
    pub fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = tracker;
        self
    }

    /// The tracker this dispatcher reports to
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Process every chunk
    ///
    /// `process` receives the chunk and the 1-based attempt number. When
    /// `deadline` passes, chunks still queued or running are abandoned and
    /// whatever already finished is kept in the report.
    pub async fn dispatch<T, F, Fut>(
        &self,
        chunks: Vec<Chunk>,
        process: F,
        deadline: Option<Instant>,
    ) -> DispatchReport<T>
    where
        T: Send + 'static,
        F: Fn(Chunk, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DispatchError>> + Send + 'static,
    {
        let total = chunks.len();
        self.progress.reset(total);

        let worker = Worker {
            process: Arc::new(process),
            progress: self.progress.clone(),
            attempts: (0..total).map(|_| AtomicU32::new(0)).collect(),
            max_attempts: self.retry_attempts,
            base_delay: self.base_delay,
        };
        let gate = Arc::new(Semaphore::new(self.max_concurrency));

        let mut slots: Vec<Option<Result<ChunkSuccess<T>, ChunkFailure>>> =
            (0..total).map(|_| None).collect();
        let mut queue = chunks.into_iter().peekable();
        let mut set = JoinSet::new();
        let mut timed_out = false;

        let expiry = async {
            if let Some(at) = deadline {
                sleep_until(at).await;
            }
        };
        tokio::pin!(expiry);

        loop {
            if queue.peek().is_none() && set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = &mut expiry, if deadline.is_some() => {
                    timed_out = true;
                    break;
                }

                permit = Arc::clone(&gate).acquire_owned(), if queue.peek().is_some() => {
                    let (Ok(permit), Some(chunk)) = (permit, queue.next()) else {
                        break;
                    };
                    let span = info_span!("chunk", chunk = chunk.index);
                    set.spawn(worker.clone().run(chunk, permit).instrument(span));
                }

                Some(joined) = set.join_next(), if !set.is_empty() => {
                    collect(&mut slots, joined);
                }

                else => break,
            }
        }

        if timed_out {
            warn!(
                running = set.len(),
                queued = queue.len(),
                "Deadline expired, abandoning unfinished chunks"
            );
            set.abort_all();
            // Tasks that finished before the abort still hand back results
            while let Some(joined) = set.join_next().await {
                collect(&mut slots, joined);
            }
        }

        self.report(slots, &worker, timed_out)
    }

    fn report<T, F>(
        &self,
        slots: Vec<Option<Result<ChunkSuccess<T>, ChunkFailure>>>,
        worker: &Worker<F>,
        timed_out: bool,
    ) -> DispatchReport<T> {
        let mut report = DispatchReport {
            completed: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
            timed_out,
            outcomes: Vec::with_capacity(slots.len()),
        };

        for (index, slot) in slots.into_iter().enumerate() {
            let attempts = worker.attempts_of(index);
            let outcome = match slot {
                Some(Ok(success)) => {
                    let outcome = ChunkOutcome {
                        index,
                        status: ChunkStatus::Completed,
                        attempts: success.attempts,
                        last_error: None,
                    };
                    report.completed.push(success);
                    outcome
                }
                Some(Err(failure)) => {
                    let outcome = ChunkOutcome {
                        index,
                        status: ChunkStatus::Failed,
                        attempts: failure.attempts,
                        last_error: Some(failure.last_error().to_string()),
                    };
                    report.failed.push(failure);
                    outcome
                }
                None if timed_out => {
                    self.progress.set(index, ChunkStatus::Abandoned);
                    report.abandoned.push(index);
                    ChunkOutcome {
                        index,
                        status: ChunkStatus::Abandoned,
                        attempts,
                        last_error: Some(DispatchError::Cancelled.to_string()),
                    }
                }
                None => {
                    // The task panicked
                    let message = "worker task ended without a result".to_string();
                    self.progress.set(index, ChunkStatus::Failed);
                    report.failed.push(ChunkFailure {
                        index,
                        attempts,
                        error: DispatchError::Cancelled,
                    });
                    ChunkOutcome {
                        index,
                        status: ChunkStatus::Failed,
                        attempts,
                        last_error: Some(message),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        debug!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Dispatch finished"
        );
        report
    }
}

fn collect<T>(
    slots: &mut [Option<Result<ChunkSuccess<T>, ChunkFailure>>],
    joined: Result<Result<ChunkSuccess<T>, ChunkFailure>, tokio::task::JoinError>,
) {
    match joined {
        Ok(result) => {
            let index = match &result {
                Ok(success) => success.index,
                Err(failure) => failure.index,
            };
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Chunk task failed: {e}"),
    }
}

/// Delay before attempt `attempt + 1`: base, 2×base, 4×base, …
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

struct Worker<F> {
    process: Arc<F>,
    progress: ProgressTracker,
    attempts: Arc<[AtomicU32]>,
    max_attempts: u32,
    base_delay: Duration,
}

impl<F> Clone for Worker<F> {
    fn clone(&self) -> Self {
        Self {
            process: Arc::clone(&self.process),
            progress: self.progress.clone(),
            attempts: Arc::clone(&self.attempts),
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

impl<F> Worker<F> {
    fn attempts_of(&self, index: usize) -> u32 {
        self.attempts
            .get(index)
            .map(|a| a.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    async fn run<T, Fut>(
        self,
        chunk: Chunk,
        permit: OwnedSemaphorePermit,
    ) -> Result<ChunkSuccess<T>, ChunkFailure>
    where
        F: Fn(Chunk, u32) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        // Held until this chunk is finished, backoff included
        let _permit = permit;
        let index = chunk.index;
        let mut attempt = 1;

        loop {
            if let Some(counter) = self.attempts.get(index) {
                counter.store(attempt, Ordering::SeqCst);
            }
            self.progress.set(index, ChunkStatus::InProgress);

            match (self.process)(chunk.clone(), attempt).await {
                Ok(value) => {
                    self.progress.set(index, ChunkStatus::Completed);
                    debug!(attempt, "Chunk completed");
                    return Ok(ChunkSuccess {
                        index,
                        attempts: attempt,
                        value,
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying chunk");
                    self.progress.set(index, ChunkStatus::Retrying);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Chunk failed");
                    self.progress.set(index, ChunkStatus::Failed);
                    let error = if err.is_retryable() {
                        DispatchError::Exhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    return Err(ChunkFailure {
                        index,
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use fieldwise_domain::{BoundaryType, InferenceError};
    use std::sync::atomic::AtomicUsize;

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                index: i,
                text: format!("chunk {}", i),
                start: i * 10,
                end: i * 10 + 10,
                overlap_len: 0,
                overlaps_previous: false,
                overlaps_next: false,
                boundary: BoundaryType::Paragraph,
            })
            .collect()
    }

    fn dispatcher(k: usize, r: u32) -> Dispatcher {
        Dispatcher::new(k, r, Duration::from_millis(100))
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_index_order() {
        // Later chunks finish first
        let report = dispatcher(8, 1)
            .dispatch(
                chunks(5),
                |chunk: Chunk, _| async move {
                    sleep(Duration::from_millis(100 - chunk.index as u64 * 10)).await;
                    Ok::<_, DispatchError>(chunk.index * 2)
                },
                None,
            )
            .await;

        let order: Vec<usize> = report.completed.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.completed[3].value, 6);
        assert!(report.failed.is_empty());
        assert!(!report.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_exact() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let report = dispatcher(4, 3)
            .dispatch(
                chunks(1),
                move |_chunk, _attempt| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(DispatchError::from(InferenceError::Timeout))
                    }
                },
                None,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 3);
        assert!(matches!(report.failed[0].error, DispatchError::Exhausted { attempts: 3, .. }));
        assert_eq!(report.outcomes[0].status, ChunkStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let report = dispatcher(4, 5)
            .dispatch(
                chunks(1),
                move |_chunk, _attempt| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(DispatchError::from(InferenceError::Other("bad model".into())))
                    }
                },
                None,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(report.failed[0].error, DispatchError::Inference(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_retried_then_succeeds() {
        let report = dispatcher(2, 3)
            .dispatch(
                chunks(1),
                |_chunk, attempt| async move {
                    if attempt < 3 {
                        Err(DispatchError::from(ParseError::new("garbled", "???")))
                    } else {
                        Ok("fine")
                    }
                },
                None,
            )
            .await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].attempts, 3);
        assert_eq!(report.outcomes[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timing() {
        let start = Instant::now();
        dispatcher(1, 3)
            .dispatch(
                chunks(1),
                |_chunk, _attempt| async { Err::<(), _>(DispatchError::from(InferenceError::Timeout)) },
                None,
            )
            .await;

        // 100ms before attempt 2, 200ms before attempt 3
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (flight, high) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let d = dispatcher(3, 1);
        let report = d
            .dispatch(
                chunks(12),
                move |_chunk, _attempt| {
                    let flight = Arc::clone(&flight);
                    let high = Arc::clone(&high);
                    async move {
                        let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                        high.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, DispatchError>(())
                    }
                },
                None,
            )
            .await;

        assert_eq!(report.completed.len(), 12);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert!(d.progress().max_in_progress() <= 3);
        assert!(d.progress().snapshot().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_slow_chunk() {
        let deadline = Instant::now() + Duration::from_millis(200);
        let report = dispatcher(4, 1)
            .dispatch(
                chunks(4),
                |chunk: Chunk, _| async move {
                    let wait = if chunk.index == 2 { 5_000 } else { 10 };
                    sleep(Duration::from_millis(wait)).await;
                    Ok::<_, DispatchError>(chunk.index)
                },
                Some(deadline),
            )
            .await;

        assert!(report.timed_out);
        assert_eq!(report.abandoned, vec![2]);
        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.outcomes[2].status, ChunkStatus::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_chunks_abandoned_at_deadline() {
        let deadline = Instant::now() + Duration::from_millis(150);
        let report = dispatcher(1, 1)
            .dispatch(
                chunks(5),
                |chunk: Chunk, _| async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, DispatchError>(chunk.index)
                },
                Some(deadline),
            )
            .await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.abandoned, vec![1, 2, 3, 4]);
        assert_eq!(report.outcomes[4].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_run_finishes_before_deadline() {
        let start = Instant::now();
        let report = dispatcher(2, 1)
            .dispatch(
                chunks(2),
                |chunk: Chunk, _| async move { Ok::<_, DispatchError>(chunk.index) },
                Some(start + Duration::from_secs(2)),
            )
            .await;

        assert!(!report.timed_out);
        assert_eq!(report.completed.len(), 2);
        assert!(report.abandoned.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_chunks_with_deadline() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let report = dispatcher(4, 3)
            .dispatch(chunks(0), |_c, _a| async { Ok::<_, DispatchError>(()) }, Some(deadline))
            .await;
        assert!(!report.timed_out);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_no_chunks() {
        let report = dispatcher(4, 3)
            .dispatch(chunks(0), |_c, _a| async { Ok::<_, DispatchError>(()) }, None)
            .await;
        assert!(report.completed.is_empty());
        assert!(report.outcomes.is_empty());
    }
}
