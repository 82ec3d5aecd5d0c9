//! The consolidation guard
//!
//! Serializes consolidation within one process: at most one run chain is
//! active at any instant. Independent callers hitting a busy guard are
//! told to skip or queue depending on priority; re-entrant callers are
//! rejected outright; nested runs are admitted only under the currently
//! active run and only up to a bounded depth. Every admitted run is
//! covered by a cancellable timeout that force-releases the guard if the
//! caller never ends it, so a stuck consolidation cannot wedge the
//! process.
//!
//! Guard state lives behind a single mutex that is never held across an
//! await; timers and the queue drain are ordinary tokio tasks. The guard
//! must be constructed inside a tokio runtime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GuardConfig;
use crate::consolidation::queue::ConsolidationQueue;
use crate::consolidation::stats::{GuardStats, StatsState};
use crate::consolidation::types::{
    AdmissionDecision, AdmissionReason, ConsolidationOp, ConsolidationOutcome, ConsolidationRun,
    RecommendedAction,
};
use crate::error::{FabulaError, Result};

/// An admitted run plus its timeout timer.
struct ActiveRun {
    run: ConsolidationRun,
    started: tokio::time::Instant,
    timer: JoinHandle<()>,
}

struct GuardState {
    /// Active run chain; the last element is the innermost run
    chain: Vec<ActiveRun>,
    /// Caller ids participating in the active chain
    call_stack: HashSet<String>,
    queue: ConsolidationQueue,
    stats: StatsState,
    shutting_down: bool,
}

struct GuardInner {
    config: GuardConfig,
    state: Mutex<GuardState>,
    drain_wake: Notify,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide serialization of consolidation runs.
///
/// Cheap to clone; all clones share the same guard state. Construct one
/// per process and inject it everywhere a consolidation can be triggered.
#[derive(Clone)]
pub struct ConsolidationGuard {
    inner: Arc<GuardInner>,
}

impl ConsolidationGuard {
    /// Create a guard and spawn its queue-drain task
    pub fn new(config: GuardConfig) -> Self {
        let queue_capacity = config.queue_capacity;
        let inner = Arc::new(GuardInner {
            config,
            state: Mutex::new(GuardState {
                chain: Vec::new(),
                call_stack: HashSet::new(),
                queue: ConsolidationQueue::new(queue_capacity),
                stats: StatsState::default(),
                shutting_down: false,
            }),
            drain_wake: Notify::new(),
            drain_task: Mutex::new(None),
        });

        let handle = tokio::spawn(drain_loop(Arc::clone(&inner)));
        *inner.drain_task.lock().unwrap() = Some(handle);

        Self { inner }
    }

    /// Create a guard with default configuration
    pub fn with_defaults() -> Self {
        Self::new(GuardConfig::default())
    }

    /// Configuration this guard was built with
    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    /// Check whether `caller_id` may start a consolidation now.
    ///
    /// Denials are values carrying a recommended action, never errors. An
    /// expired active run is recovered before the decision is made.
    pub fn can_start(
        &self,
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
    ) -> AdmissionDecision {
        self.inner.admission(caller_id, parent_run_id, priority, true)
    }

    /// Begin a run after a successful [`can_start`](Self::can_start).
    ///
    /// Re-validates admission under the lock; starting without admission
    /// is an error and leaves the guard untouched. Arms the run's timeout
    /// timer.
    pub fn start(
        &self,
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
    ) -> Result<Uuid> {
        self.inner.start(caller_id, parent_run_id, priority, 0)
    }

    /// End the innermost active run.
    ///
    /// Both the run id and the caller id must match exactly; a mismatch is
    /// logged and rejected without touching guard state, so one caller can
    /// never release another's run. Returns whether the run was released.
    pub fn end(&self, run_id: Uuid, caller_id: &str) -> bool {
        self.inner.end(run_id, caller_id)
    }

    /// Unconditionally clear the active run chain and call stack.
    pub fn force_release(&self) {
        let released = {
            let mut state = self.inner.state.lock().unwrap();
            GuardInner::force_release_locked(&mut state)
        };
        if released {
            info!("consolidation guard force-released");
            self.inner.drain_wake.notify_one();
        }
    }

    /// Defer an operation until the guard is free.
    ///
    /// Returns a receiver that resolves once the operation has run (or
    /// failed terminally, or been abandoned by shutdown). Rejects
    /// immediately with [`FabulaError::QueueFull`] at capacity.
    pub fn enqueue(
        &self,
        caller_id: &str,
        operation: ConsolidationOp,
        priority: u8,
        parent_run_id: Option<Uuid>,
    ) -> Result<oneshot::Receiver<Result<ConsolidationOutcome>>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutting_down {
                return Err(FabulaError::ShuttingDown);
            }
            let position = state
                .queue
                .push(caller_id, priority, parent_run_id, operation, tx)?;
            debug!(
                caller_id,
                priority,
                position,
                queued = state.queue.len(),
                "deferred consolidation"
            );
        }
        self.inner.drain_wake.notify_one();
        Ok(rx)
    }

    /// [`enqueue`](Self::enqueue) and await the outcome
    pub async fn enqueue_and_wait(
        &self,
        caller_id: &str,
        operation: ConsolidationOp,
        priority: u8,
        parent_run_id: Option<Uuid>,
    ) -> Result<ConsolidationOutcome> {
        let rx = self.enqueue(caller_id, operation, priority, parent_run_id)?;
        rx.await.map_err(|_| {
            FabulaError::Consolidation("queued consolidation was abandoned".to_string())
        })?
    }

    /// Snapshot the guard's counters and health signals
    pub fn stats(&self) -> GuardStats {
        let state = self.inner.state.lock().unwrap();
        GuardStats::snapshot(
            &state.stats,
            state.chain.len(),
            state.queue.len(),
            self.inner.config.queue_capacity,
        )
    }

    /// Clear all guard state, including statistics. Test support.
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.inner.state.lock().unwrap();
            for active in state.chain.drain(..) {
                active.timer.abort();
            }
            state.call_stack.clear();
            state.stats = StatsState::default();
            state.shutting_down = false;
            state.queue.drain_all()
        };
        // Dropping the entries' completion senders wakes any waiters with
        // a receive error.
        drop(dropped);
    }

    /// Stop accepting work, reject all pending queue entries, and
    /// force-release any active run.
    pub fn shutdown(&self) {
        let entries = {
            let mut state = self.inner.state.lock().unwrap();
            state.shutting_down = true;
            GuardInner::force_release_locked(&mut state);
            state.queue.drain_all()
        };
        for entry in entries {
            let _ = entry.completion.send(Err(FabulaError::ShuttingDown));
        }
        self.inner.drain_wake.notify_one();
        if let Some(handle) = self.inner.drain_task.lock().unwrap().take() {
            handle.abort();
        }
        info!("consolidation guard shut down");
    }
}

impl GuardInner {
    fn admission(
        &self,
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
        record_stats: bool,
    ) -> AdmissionDecision {
        let mut state = self.state.lock().unwrap();
        self.recover_expired_locked(&mut state);

        let decision = Self::evaluate(&self.config, &state, caller_id, parent_run_id, priority);
        if record_stats && !decision.allowed {
            match decision.reason {
                AdmissionReason::Recursive => state.stats.record_recursion_block(),
                AdmissionReason::ShuttingDown => {}
                _ => state.stats.record_blocked(),
            }
        }
        decision
    }

    fn evaluate(
        config: &GuardConfig,
        state: &GuardState,
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
    ) -> AdmissionDecision {
        if state.shutting_down {
            return AdmissionDecision::denied(
                AdmissionReason::ShuttingDown,
                RecommendedAction::Skip,
            );
        }

        // Re-entrant callers are never admitted and never queued,
        // whatever their priority.
        if state.call_stack.contains(caller_id) {
            return AdmissionDecision::denied(AdmissionReason::Recursive, RecommendedAction::Reject);
        }

        let Some(top) = state.chain.last() else {
            return AdmissionDecision::allowed();
        };

        if parent_run_id == Some(top.run.id) {
            // Nested under the active run: admit up to the depth bound.
            if state.chain.len() >= config.max_call_depth {
                return AdmissionDecision::denied(
                    AdmissionReason::DepthExceeded,
                    RecommendedAction::Reject,
                );
            }
            return AdmissionDecision::allowed();
        }

        if priority >= config.queue_priority_threshold {
            AdmissionDecision::queueable(state.queue.position_for(priority))
        } else {
            AdmissionDecision::denied(AdmissionReason::ActiveRun, RecommendedAction::Skip)
        }
    }

    fn start(
        self: &Arc<Self>,
        caller_id: &str,
        parent_run_id: Option<Uuid>,
        priority: u8,
        retry_count: u32,
    ) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        self.recover_expired_locked(&mut state);

        let decision = Self::evaluate(&self.config, &state, caller_id, parent_run_id, priority);
        if !decision.allowed {
            return Err(FabulaError::Consolidation(format!(
                "start without admission ({:?}) for caller {caller_id}",
                decision.reason
            )));
        }

        let run = ConsolidationRun::new(caller_id, parent_run_id, priority, retry_count);
        let run_id = run.id;
        let timeout = self.config.run_timeout();
        let timer = tokio::spawn({
            let inner = Arc::clone(self);
            async move {
                tokio::time::sleep(timeout).await;
                inner.expire_run(run_id);
            }
        });

        state.chain.push(ActiveRun {
            run,
            started: tokio::time::Instant::now(),
            timer,
        });
        state.call_stack.insert(caller_id.to_string());
        let depth = state.chain.len();
        state.stats.observe_depth(depth);

        debug!(caller_id, %run_id, depth, priority, "consolidation run started");
        Ok(run_id)
    }

    fn end(&self, run_id: Uuid, caller_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();

        let matches = state
            .chain
            .last()
            .map(|top| top.run.id == run_id && top.run.caller_id == caller_id)
            .unwrap_or(false);
        if !matches {
            warn!(
                %run_id,
                caller_id,
                "end() does not match the active run; state untouched"
            );
            return false;
        }

        let active = state.chain.pop().expect("chain top checked above");
        active.timer.abort();
        state.call_stack.remove(caller_id);

        let duration_ms = active.started.elapsed().as_millis() as u64;
        state.stats.record_success(duration_ms);
        let idle = state.chain.is_empty();

        debug!(caller_id, %run_id, duration_ms, "consolidation run ended");
        drop(state);

        if idle {
            self.drain_wake.notify_one();
        }
        true
    }

    /// Timeout timer callback: release the chain if `run_id` is still live.
    fn expire_run(&self, run_id: Uuid) {
        let released = {
            let mut state = self.state.lock().unwrap();
            if state.chain.iter().any(|active| active.run.id == run_id) {
                warn!(%run_id, "consolidation run exceeded its timeout; force-releasing");
                state.stats.record_timeout();
                Self::force_release_locked(&mut state)
            } else {
                false
            }
        };
        if released {
            self.drain_wake.notify_one();
        }
    }

    /// Lazy companion to the timeout timer: a caller observing the guard
    /// recovers an expired chain before being evaluated.
    fn recover_expired_locked(&self, state: &mut GuardState) {
        let expired = state
            .chain
            .last()
            .map(|top| top.started.elapsed() >= self.config.run_timeout())
            .unwrap_or(false);
        if expired {
            warn!("active consolidation run expired; recovering before admission");
            state.stats.record_timeout();
            Self::force_release_locked(state);
        }
    }

    fn force_release_locked(state: &mut GuardState) -> bool {
        if state.chain.is_empty() {
            return false;
        }
        for active in state.chain.drain(..) {
            active.timer.abort();
        }
        state.call_stack.clear();
        state.stats.record_force_release();
        true
    }
}

/// Single-flight background drain of the deferred-consolidation queue.
async fn drain_loop(inner: Arc<GuardInner>) {
    loop {
        let pending = {
            let state = inner.state.lock().unwrap();
            !state.queue.is_empty() && !state.shutting_down
        };
        if pending {
            // Contended earlier or waiting on an active run: poll again
            // after the backoff even if nobody wakes us.
            let _ = tokio::time::timeout(
                inner.config.drain_backoff(),
                inner.drain_wake.notified(),
            )
            .await;
        } else {
            inner.drain_wake.notified().await;
        }

        if inner.state.lock().unwrap().shutting_down {
            return;
        }

        loop {
            let entry = {
                let mut state = inner.state.lock().unwrap();
                if state.shutting_down || !state.chain.is_empty() || state.queue.is_empty() {
                    None
                } else {
                    state.queue.pop()
                }
            };
            let Some(mut entry) = entry else { break };

            let decision =
                inner.admission(&entry.caller_id, entry.parent_run_id, entry.priority, false);
            if !decision.allowed {
                let mut state = inner.state.lock().unwrap();
                state.queue.reinsert(entry);
                break;
            }

            let run_id = match inner.start(
                &entry.caller_id,
                entry.parent_run_id,
                entry.priority,
                entry.retry_count,
            ) {
                Ok(id) => id,
                Err(e) => {
                    debug!(error = %e, "drained entry lost the admission race; requeueing");
                    let mut state = inner.state.lock().unwrap();
                    state.queue.reinsert(entry);
                    break;
                }
            };

            let result = (entry.operation)().await;
            let ended = inner.end(run_id, &entry.caller_id);

            if !ended {
                // The run was force-released while the operation ran; its
                // result is dropped.
                let _ = entry.completion.send(Err(FabulaError::Consolidation(
                    "consolidation run was force-released before completing".to_string(),
                )));
            } else {
                match result {
                    Ok(outcome) => {
                        let _ = entry.completion.send(Ok(outcome));
                    }
                    Err(e) => {
                        if entry.retry_count < inner.config.max_retries {
                            entry.retry_count += 1;
                            warn!(
                                caller_id = entry.caller_id,
                                retry = entry.retry_count,
                                error = %e,
                                "queued consolidation failed; requeueing"
                            );
                            let mut state = inner.state.lock().unwrap();
                            state.queue.reinsert(entry);
                        } else {
                            inner.state.lock().unwrap().stats.record_failure();
                            let _ = entry.completion.send(Err(e));
                        }
                    }
                }
            }

            tokio::time::sleep(inner.config.drain_pause()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_guard() -> ConsolidationGuard {
        ConsolidationGuard::new(GuardConfig {
            run_timeout_secs: 30,
            max_call_depth: 3,
            queue_capacity: 4,
            queue_priority_threshold: 7,
            max_retries: 1,
            drain_pause_ms: 1,
            drain_backoff_ms: 20,
        })
    }

    #[tokio::test]
    async fn test_idle_guard_admits() {
        let guard = test_guard();
        let decision = guard.can_start("pipelineA", None, 5);
        assert!(decision.allowed);
        assert_eq!(decision.recommended_action, RecommendedAction::Proceed);
    }

    #[tokio::test]
    async fn test_start_end_cycle() {
        let guard = test_guard();
        let run_id = guard.start("pipelineA", None, 5).unwrap();

        assert!(!guard.can_start("pipelineB", None, 5).allowed);
        assert!(guard.end(run_id, "pipelineA"));
        assert!(guard.can_start("pipelineB", None, 5).allowed);
    }

    #[tokio::test]
    async fn test_start_without_admission_errors() {
        let guard = test_guard();
        let _run = guard.start("pipelineA", None, 5).unwrap();

        let result = guard.start("pipelineB", None, 5);
        assert!(result.is_err());
        // The failed start changed nothing.
        assert_eq!(guard.stats().active_depth, 1);
    }

    #[tokio::test]
    async fn test_end_wrong_caller_rejected() {
        let guard = test_guard();
        let run_id = guard.start("pipelineA", None, 5).unwrap();

        assert!(!guard.end(run_id, "pipelineB"));
        assert!(!guard.end(Uuid::new_v4(), "pipelineA"));
        assert_eq!(guard.stats().active_depth, 1);

        assert!(guard.end(run_id, "pipelineA"));
    }

    #[tokio::test]
    async fn test_nested_runs_and_depth_bound() {
        let guard = test_guard();
        let outer = guard.start("outer", None, 5).unwrap();

        // Nested admission requires naming the active run as parent.
        assert!(!guard.can_start("middle", None, 5).allowed);
        assert!(guard.can_start("middle", Some(outer), 5).allowed);

        let middle = guard.start("middle", Some(outer), 5).unwrap();
        let inner = guard.start("inner", Some(middle), 5).unwrap();

        // Depth bound (3) reached.
        let decision = guard.can_start("fourth", Some(inner), 5);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, AdmissionReason::DepthExceeded);
        assert_eq!(decision.recommended_action, RecommendedAction::Reject);

        // LIFO release discipline.
        assert!(!guard.end(outer, "outer"));
        assert!(guard.end(inner, "inner"));
        assert!(guard.end(middle, "middle"));
        assert!(guard.end(outer, "outer"));
        assert_eq!(guard.stats().peak_depth, 3);
    }

    #[tokio::test]
    async fn test_recursion_always_rejected() {
        let guard = test_guard();
        let run_id = guard.start("pipelineA", None, 5).unwrap();

        for priority in [0, 5, 10] {
            let decision = guard.can_start("pipelineA", Some(run_id), priority);
            assert!(!decision.allowed);
            assert_eq!(decision.reason, AdmissionReason::Recursive);
            assert_eq!(decision.recommended_action, RecommendedAction::Reject);
        }
        assert_eq!(guard.stats().recursion_blocks, 3);
    }

    #[tokio::test]
    async fn test_priority_split_queue_vs_skip() {
        let guard = test_guard();
        let _run = guard.start("pipelineA", None, 5).unwrap();

        let low = guard.can_start("low", None, 3);
        assert_eq!(low.recommended_action, RecommendedAction::Skip);
        assert!(low.queue_position.is_none());

        let high = guard.can_start("high", None, 9);
        assert_eq!(high.recommended_action, RecommendedAction::Queue);
        assert_eq!(high.queue_position, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_timeout_recovery_in_can_start() {
        let guard = test_guard();
        let _run = guard.start("stuck", None, 5).unwrap();
        assert!(!guard.can_start("other", None, 5).allowed);

        // Move past the timeout without yielding to the timer task.
        tokio::time::advance(std::time::Duration::from_secs(31)).await;

        let decision = guard.can_start("other", None, 5);
        assert!(decision.allowed);
        assert_eq!(guard.stats().force_releases, 1);
    }
}
