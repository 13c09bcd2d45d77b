//! Per-chunk progress tracking
//!
//! The dispatcher records every status transition here. Observers either
//! poll [`ProgressTracker::snapshot`] or await changes on a watch channel.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Lifecycle state of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Waiting for a concurrency slot
    Pending,
    /// An attempt is running
    InProgress,
    /// Backing off before another attempt
    Retrying,
    /// Values were extracted
    Completed,
    /// Every attempt failed
    Failed,
    /// Still running when the document deadline expired
    Abandoned,
}

impl ChunkStatus {
    /// Whether the chunk has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChunkStatus::Completed | ChunkStatus::Failed | ChunkStatus::Abandoned
        )
    }
}

/// Counts of chunks by status at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Chunks in the run
    pub total_chunks: usize,
    /// Waiting for a slot
    pub pending: usize,
    /// Running an attempt
    pub in_progress: usize,
    /// Backing off
    pub retrying: usize,
    /// Finished with values
    pub completed: usize,
    /// Failed or abandoned
    pub failed: usize,
}

impl ProgressSnapshot {
    fn from_statuses(statuses: &[ChunkStatus]) -> Self {
        let mut snap = Self {
            total_chunks: statuses.len(),
            ..Self::default()
        };
        for status in statuses {
            match status {
                ChunkStatus::Pending => snap.pending += 1,
                ChunkStatus::InProgress => snap.in_progress += 1,
                ChunkStatus::Retrying => snap.retrying += 1,
                ChunkStatus::Completed => snap.completed += 1,
                ChunkStatus::Failed | ChunkStatus::Abandoned => snap.failed += 1,
            }
        }
        snap
    }

    /// Chunks in a final state
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    /// Whether every chunk has reached a final state
    pub fn is_done(&self) -> bool {
        self.finished() == self.total_chunks
    }
}

struct State {
    statuses: Vec<ChunkStatus>,
    max_in_progress: usize,
}

/// Shared, cloneable view of a run's chunk statuses
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<State>>,
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(State {
                statuses: Vec::new(),
                max_in_progress: 0,
            })),
            tx: Arc::new(tx),
        }
    }

    /// Start tracking `total` chunks, all pending
    pub fn reset(&self, total: usize) {
        let mut state = self.lock();
        state.statuses = vec![ChunkStatus::Pending; total];
        state.max_in_progress = 0;
        self.publish(&state);
    }

    /// Record a status transition; unknown indices are ignored
    pub fn set(&self, index: usize, status: ChunkStatus) {
        let mut state = self.lock();
        let Some(slot) = state.statuses.get_mut(index) else {
            return;
        };
        *slot = status;

        let in_progress = state
            .statuses
            .iter()
            .filter(|s| **s == ChunkStatus::InProgress)
            .count();
        state.max_in_progress = state.max_in_progress.max(in_progress);
        self.publish(&state);
    }

    /// Status of one chunk
    pub fn status(&self, index: usize) -> Option<ChunkStatus> {
        self.lock().statuses.get(index).copied()
    }

    /// Current counts
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_statuses(&self.lock().statuses)
    }

    /// Receive a fresh snapshot after every transition
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Most chunks ever observed in progress at once during this run
    pub fn max_in_progress(&self) -> usize {
        self.lock().max_in_progress
    }

    fn publish(&self, state: &State) {
        self.tx
            .send_replace(ProgressSnapshot::from_statuses(&state.statuses));
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
