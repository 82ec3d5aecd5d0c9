//! Shared types for the consolidation protocol

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A consolidation operation deferred into the guard's queue.
///
/// The factory is invoked once per attempt, so a retried entry re-runs the
/// operation from the top.
pub type ConsolidationOp =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ConsolidationOutcome>> + Send + Sync>;

/// One admitted consolidation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRun {
    /// Unique id of this run
    pub id: Uuid,
    /// Logical caller that owns the run; only it may end the run
    pub caller_id: String,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// The run this one is nested under, if any
    pub parent_run_id: Option<Uuid>,
    /// Priority the run was admitted with
    pub priority: u8,
    /// How many times this operation has been retried from the queue
    pub retry_count: u32,
    /// Process that owns the run slot
    pub owner_process_id: u32,
}

impl ConsolidationRun {
    pub(crate) fn new(
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            started_at: Utc::now(),
            parent_run_id,
            priority,
            retry_count,
            owner_process_id: std::process::id(),
        }
    }
}

/// Why an admission decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionReason {
    /// Nothing blocks this caller
    Clear,
    /// Another run (chain) is active and this caller is not part of it
    ActiveRun,
    /// The caller is already on the active call stack
    Recursive,
    /// Admitting the run would exceed the maximum nesting depth
    DepthExceeded,
    /// The guard is shutting down
    ShuttingDown,
}

/// What a denied caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    /// Admission granted; call `start`
    Proceed,
    /// Enqueue the operation and await its turn
    Queue,
    /// Skip this consolidation attempt entirely
    Skip,
    /// Do not retry in this context (recursion or depth overflow)
    Reject,
}

/// Result of a guard admission check.
///
/// Denials are ordinary values, not errors; `recommended_action` tells the
/// caller how to proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the caller may call `start` now
    pub allowed: bool,
    /// Why
    pub reason: AdmissionReason,
    /// What the caller should do
    pub recommended_action: RecommendedAction,
    /// Where the caller would land in the queue, when queueing is recommended
    pub queue_position: Option<usize>,
}

impl AdmissionDecision {
    pub(crate) fn allowed() -> Self {
        Self {
            allowed: true,
            reason: AdmissionReason::Clear,
            recommended_action: RecommendedAction::Proceed,
            queue_position: None,
        }
    }

    pub(crate) fn denied(reason: AdmissionReason, action: RecommendedAction) -> Self {
        Self {
            allowed: false,
            reason,
            recommended_action: action,
            queue_position: None,
        }
    }

    pub(crate) fn queueable(position: usize) -> Self {
        Self {
            allowed: false,
            reason: AdmissionReason::ActiveRun,
            recommended_action: RecommendedAction::Queue,
            queue_position: Some(position),
        }
    }
}

/// Summary of one consolidation run's effect on the tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    /// Records moved into a higher tier
    pub promoted: usize,
    /// Promoted records that merged with an existing higher-tier record
    pub merged: usize,
    /// Records examined but left in place
    pub skipped: usize,
    /// Whether a consolidation body actually ran
    pub ran: bool,
}

impl ConsolidationOutcome {
    /// Outcome for an attempt that was skipped or denied without running
    pub fn noop() -> Self {
        Self::default()
    }

    /// Fold a sweep's counts into this outcome
    pub fn absorb(&mut self, other: ConsolidationOutcome) {
        self.promoted += other.promoted;
        self.merged += other.merged;
        self.skipped += other.skipped;
        self.ran = self.ran || other.ran;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_owner_process() {
        let run = ConsolidationRun::new("pipelineA", None, 5, 0);
        assert_eq!(run.owner_process_id, std::process::id());
        assert_eq!(run.caller_id, "pipelineA");
        assert!(run.parent_run_id.is_none());
    }

    #[test]
    fn test_outcome_absorb() {
        let mut outcome = ConsolidationOutcome::noop();
        assert!(!outcome.ran);

        outcome.absorb(ConsolidationOutcome {
            promoted: 3,
            merged: 1,
            skipped: 2,
            ran: true,
        });
        outcome.absorb(ConsolidationOutcome {
            promoted: 1,
            merged: 0,
            skipped: 0,
            ran: true,
        });

        assert_eq!(outcome.promoted, 4);
        assert_eq!(outcome.merged, 1);
        assert_eq!(outcome.skipped, 2);
        assert!(outcome.ran);
    }
}
