//! Deferred consolidation requests
//!
//! Holds queue entries in strict priority order (descending), FIFO on
//! ties via a monotonic sequence number. The guard owns the queue and
//! drains it from a single background task.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::consolidation::types::{ConsolidationOp, ConsolidationOutcome};
use crate::error::{FabulaError, Result};

/// A deferred consolidation request awaiting admission.
pub struct QueueEntry {
    /// Unique id of this entry
    pub id: Uuid,
    /// Logical caller the operation runs on behalf of
    pub caller_id: String,
    /// Admission priority (0..=10)
    pub priority: u8,
    /// Retries consumed so far
    pub retry_count: u32,
    /// When the entry was enqueued
    pub queued_at: DateTime<Utc>,
    /// Parent run the operation nests under, if any
    pub parent_run_id: Option<Uuid>,
    /// Arrival order; preserved across retries to keep FIFO fairness
    pub sequence: u64,
    /// The deferred operation
    pub operation: ConsolidationOp,
    /// Completion channel back to the enqueueing caller
    pub completion: oneshot::Sender<Result<ConsolidationOutcome>>,
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("caller_id", &self.caller_id)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Priority-ordered queue of deferred consolidations.
#[derive(Debug)]
pub struct ConsolidationQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl ConsolidationQueue {
    /// Create an empty queue with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            next_sequence: 0,
        }
    }

    /// Number of entries waiting
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The position a new entry with `priority` would be drained at
    pub fn position_for(&self, priority: u8) -> usize {
        self.entries
            .iter()
            .take_while(|e| e.priority >= priority)
            .count()
    }

    /// Enqueue a new operation, assigning it the next arrival sequence.
    ///
    /// Returns the entry's queue position, or [`FabulaError::QueueFull`]
    /// when the queue is at capacity.
    pub fn push(
        &mut self,
        caller_id: &str,
        priority: u8,
        parent_run_id: Option<Uuid>,
        operation: ConsolidationOp,
        completion: oneshot::Sender<Result<ConsolidationOutcome>>,
    ) -> Result<usize> {
        if self.entries.len() >= self.capacity {
            return Err(FabulaError::QueueFull {
                capacity: self.capacity,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = QueueEntry {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            priority,
            retry_count: 0,
            queued_at: Utc::now(),
            parent_run_id,
            sequence,
            operation,
            completion,
        };

        Ok(self.insert(entry))
    }

    /// Re-insert a popped entry, keeping its original sequence.
    ///
    /// Used for retries and for entries popped while the guard turned out
    /// to still be contended; bypasses the capacity check since the entry
    /// already held a slot.
    pub fn reinsert(&mut self, entry: QueueEntry) -> usize {
        self.insert(entry)
    }

    /// Pop the highest-priority entry (FIFO among equals)
    pub fn pop(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove and return every waiting entry (shutdown/reset path)
    pub fn drain_all(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }

    fn insert(&mut self, entry: QueueEntry) -> usize {
        let position = self
            .entries
            .iter()
            .take_while(|e| {
                e.priority > entry.priority
                    || (e.priority == entry.priority && e.sequence < entry.sequence)
            })
            .count();
        self.entries.insert(position, entry);
        position
    }
}
