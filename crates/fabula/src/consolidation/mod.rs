//! Consolidation protocol: guard, queue, resolver, and statistics
//!
//! Consolidation merges records from a lower memory tier into the next
//! higher one. The guard serializes runs process-wide; the resolver
//! decides what promotion does to duplicates; the queue defers blocked
//! high-priority callers.

pub mod guard;
pub mod queue;
pub mod resolver;
pub mod stats;
pub mod types;

pub use guard::ConsolidationGuard;
pub use queue::{ConsolidationQueue, QueueEntry};
pub use resolver::{Resolution, resolve};
pub use stats::GuardStats;
pub use types::{
    AdmissionDecision, AdmissionReason, ConsolidationOp, ConsolidationOutcome, ConsolidationRun,
    RecommendedAction,
};
