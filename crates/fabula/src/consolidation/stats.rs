//! Guard statistics and health signals

use serde::Serialize;

/// Internal counters owned by the guard, updated under its state mutex.
#[derive(Debug, Default, Clone)]
pub(crate) struct StatsState {
    pub blocked_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub recursion_blocks: u64,
    pub timed_out_runs: u64,
    pub force_releases: u64,
    pub peak_depth: usize,
    completed_runs: u64,
    total_duration_ms: u64,
}

impl StatsState {
    pub fn record_blocked(&mut self) {
        self.blocked_calls += 1;
    }

    pub fn record_recursion_block(&mut self) {
        self.blocked_calls += 1;
        self.recursion_blocks += 1;
    }

    pub fn record_success(&mut self, duration_ms: u64) {
        self.successful_calls += 1;
        self.completed_runs += 1;
        self.total_duration_ms += duration_ms;
    }

    pub fn record_failure(&mut self) {
        self.failed_calls += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timed_out_runs += 1;
    }

    pub fn record_force_release(&mut self) {
        self.force_releases += 1;
    }

    pub fn observe_depth(&mut self, depth: usize) {
        if depth > self.peak_depth {
            self.peak_depth = depth;
        }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.completed_runs == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.completed_runs as f64
        }
    }
}

/// Operator-facing snapshot of the guard's counters and health.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    /// Admission checks that came back denied
    pub blocked_calls: u64,
    /// Runs that started and ended normally
    pub successful_calls: u64,
    /// Queued operations that failed after exhausting retries
    pub failed_calls: u64,
    /// Denials caused by re-entrant callers
    pub recursion_blocks: u64,
    /// Runs released by the timeout timer
    pub timed_out_runs: u64,
    /// Total force releases (timeouts, manual, shutdown)
    pub force_releases: u64,
    /// Current nesting depth of the active run chain
    pub active_depth: usize,
    /// Highest nesting depth observed
    pub peak_depth: usize,
    /// Running average run duration in milliseconds
    pub avg_duration_ms: f64,
    /// Deferred operations currently waiting
    pub queue_length: usize,
    /// Overall health flag derived from the counters
    pub healthy: bool,
    /// Operator hints derived from unhealthy counters
    pub recommendations: Vec<String>,
}

impl GuardStats {
    pub(crate) fn snapshot(
        state: &StatsState,
        active_depth: usize,
        queue_length: usize,
        queue_capacity: usize,
    ) -> Self {
        let mut healthy = true;
        let mut recommendations = Vec::new();

        if state.force_releases > 0
            && state.force_releases * 4 >= state.successful_calls.max(1)
        {
            healthy = false;
            recommendations.push(
                "Runs are being force-released frequently; look for stalled consolidation callers"
                    .to_string(),
            );
        }

        if queue_capacity > 0 && queue_length * 2 >= queue_capacity {
            healthy = false;
            recommendations.push(
                "Consolidation queue is over half full; reduce trigger frequency or raise capacity"
                    .to_string(),
            );
        }

        if state.failed_calls > 0 && state.failed_calls >= state.successful_calls.max(1) {
            healthy = false;
            recommendations.push(
                "Queued consolidations are failing after retries; inspect the operation errors"
                    .to_string(),
            );
        }

        if state.recursion_blocks > 0 {
            recommendations.push(
                "Re-entrant consolidation attempts were rejected; audit pipelines that trigger consolidation from within one"
                    .to_string(),
            );
        }

        Self {
            blocked_calls: state.blocked_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            recursion_blocks: state.recursion_blocks,
            timed_out_runs: state.timed_out_runs,
            force_releases: state.force_releases,
            active_depth,
            peak_depth: state.peak_depth,
            avg_duration_ms: state.avg_duration_ms(),
            queue_length,
            healthy,
            recommendations,
        }
    }
}
