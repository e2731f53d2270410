use std::fmt;

use tracing::debug;

use super::messages::Batch;

/// Lifecycle of one pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Running,
    /// Upstream is done and its queue is empty; flushing what is left.
    Draining,
    Done,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseState::Running => write!(f, "running"),
            PhaseState::Draining => write!(f, "draining"),
            PhaseState::Done => write!(f, "done"),
        }
    }
}

/// Tracks and logs a phase's state transitions. Transitions only move
/// forward.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: &'static str,
    state: PhaseState,
}

impl PhaseTracker {
    pub fn new(phase: &'static str) -> Self {
        debug!(phase, state = %PhaseState::Running, "phase started");
        Self {
            phase,
            state: PhaseState::Running,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn draining(&mut self) {
        self.advance(PhaseState::Draining);
    }

    pub fn done(&mut self) {
        self.advance(PhaseState::Done);
    }

    fn advance(&mut self, next: PhaseState) {
        if next as u8 <= self.state as u8 {
            return;
        }
        debug!(phase = self.phase, from = %self.state, to = %next, "phase transition");
        self.state = next;
    }
}

/// Accumulates items for one file until the batch threshold is reached.
pub struct BatchBuffer<T> {
    file_id: u64,
    items: Vec<T>,
    payload_len: u64,
    threshold: usize,
}

impl<T> BatchBuffer<T> {
    pub fn new(file_id: u64, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            file_id,
            items: Vec::with_capacity(threshold),
            payload_len: 0,
            threshold,
        }
    }

    /// Add an item. Returns true once the buffer is full.
    pub fn push(&mut self, item: T, len: u64) -> bool {
        self.items.push(item);
        self.payload_len += len;
        self.items.len() >= self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take whatever is buffered, regardless of fill level.
    pub fn take(&mut self) -> Option<Batch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.threshold));
        let payload_len = std::mem::take(&mut self.payload_len);
        Some(Batch {
            file_id: self.file_id,
            items,
            payload_len,
        })
    }
}
