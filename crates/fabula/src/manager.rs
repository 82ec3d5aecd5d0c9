//! Memory manager façade
//!
//! Wires the tier stores, the duplicate resolver, and the consolidation
//! guard together behind one handle. Tier reads and writes proceed
//! concurrently with an in-flight consolidation - only consolidation
//! itself is serialized, and tier integrity during a run relies on the
//! guard's at-most-one-active-run invariant.

use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, ConsolidationConfig};
use crate::consolidation::guard::ConsolidationGuard;
use crate::consolidation::resolver::resolve;
use crate::consolidation::stats::GuardStats;
use crate::consolidation::types::{ConsolidationOp, ConsolidationOutcome, RecommendedAction};
use crate::error::Result;
use crate::memory::types::{MemoryTier, Record};
use crate::storage::blob::BlobStore;
use crate::storage::filter::RecordFilter;
use crate::storage::tier::TierStore;

/// Default priority for consolidation attempts
pub const DEFAULT_PRIORITY: u8 = 5;

struct ManagerInner {
    recent: RwLock<TierStore>,
    derived: RwLock<TierStore>,
    consolidated: RwLock<TierStore>,
    blobs: Arc<dyn BlobStore>,
    guard: ConsolidationGuard,
    thresholds: ConsolidationConfig,
}

/// Public façade over the tiered memory store.
///
/// Cheap to clone; all clones share tiers and guard. Construct inside a
/// tokio runtime (the guard spawns its drain task on creation).
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<ManagerInner>,
}

impl MemoryManager {
    /// Create a manager with its own guard built from `config`
    pub fn new(blobs: Arc<dyn BlobStore>, config: Config) -> Self {
        let guard = ConsolidationGuard::new(config.guard.clone());
        Self::with_guard(blobs, config, guard)
    }

    /// Create a manager sharing an externally constructed guard.
    ///
    /// All consolidation triggers within one process must share one guard;
    /// inject the same instance everywhere.
    pub fn with_guard(blobs: Arc<dyn BlobStore>, config: Config, guard: ConsolidationGuard) -> Self {
        let inner = ManagerInner {
            recent: RwLock::new(TierStore::with_capacity(
                MemoryTier::Recent,
                config.storage.recent_capacity,
            )),
            derived: RwLock::new(TierStore::new(MemoryTier::Derived)),
            consolidated: RwLock::new(TierStore::new(MemoryTier::Consolidated)),
            blobs,
            guard,
            thresholds: config.consolidation.clone(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The guard shared by this manager
    pub fn guard(&self) -> &ConsolidationGuard {
        &self.inner.guard
    }

    /// Insert or replace a record in `tier`.
    ///
    /// Puts into the Recent tier evict overflow immediately; evicted
    /// records are logged and dropped.
    pub fn put(&self, tier: MemoryTier, record: Record) {
        let store = self.inner.tier(tier);
        let mut store = store.write().unwrap();
        store.put(record);
        if tier == MemoryTier::Recent {
            let evicted = store.evict_overflow();
            for record in &evicted {
                debug!(id = %record.id, "recent tier overflow; record evicted");
            }
        }
    }

    /// Get a record by id from `tier`
    pub fn get(&self, tier: MemoryTier, id: Uuid) -> Option<Record> {
        self.inner.tier(tier).read().unwrap().get(id).cloned()
    }

    /// Records in `tier` matching `filter`, oldest first
    pub fn query(&self, tier: MemoryTier, filter: &RecordFilter) -> Vec<Record> {
        let store = self.inner.tier(tier).read().unwrap();
        let mut records: Vec<Record> = store.query(filter).cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Delete a record by id from `tier`, returning whether it existed
    pub fn delete(&self, tier: MemoryTier, id: Uuid) -> bool {
        self.inner.tier(tier).write().unwrap().delete(id).is_some()
    }

    /// Number of records currently in `tier`
    pub fn len(&self, tier: MemoryTier) -> usize {
        self.inner.tier(tier).read().unwrap().len()
    }

    /// Check whether every tier is empty
    pub fn is_empty(&self) -> bool {
        MemoryTier::all().iter().all(|t| self.len(*t) == 0)
    }

    /// Trigger a consolidation with [`DEFAULT_PRIORITY`]
    pub async fn consolidate(&self, caller_id: &str) -> Result<ConsolidationOutcome> {
        self.consolidate_with_priority(caller_id, DEFAULT_PRIORITY)
            .await
    }

    /// Trigger a consolidation, routing admission through the guard.
    ///
    /// When the guard recommends queueing, the call transparently waits
    /// for its turn; when it recommends skipping (or rejects recursion),
    /// a no-op outcome is returned rather than an error. Only a
    /// consolidation body that failed terminally surfaces as `Err`.
    pub async fn consolidate_with_priority(
        &self,
        caller_id: &str,
        priority: u8,
    ) -> Result<ConsolidationOutcome> {
        let guard = &self.inner.guard;
        let decision = guard.can_start(caller_id, None, priority);

        if decision.allowed {
            let run_id = guard.start(caller_id, None, priority)?;
            let result = Self::run_consolidation(&self.inner).await;
            if !guard.end(run_id, caller_id) {
                warn!(
                    caller_id,
                    %run_id,
                    "consolidation run was force-released while running"
                );
            }
            return result;
        }

        match decision.recommended_action {
            RecommendedAction::Queue => {
                info!(
                    caller_id,
                    priority,
                    position = ?decision.queue_position,
                    "guard busy; queueing consolidation"
                );
                let inner = Arc::clone(&self.inner);
                let op: ConsolidationOp = Arc::new(move || {
                    let inner = Arc::clone(&inner);
                    Box::pin(async move { MemoryManager::run_consolidation(&inner).await })
                });
                guard.enqueue_and_wait(caller_id, op, priority, None).await
            }
            _ => {
                debug!(
                    caller_id,
                    reason = ?decision.reason,
                    "consolidation not admitted; returning no-op outcome"
                );
                Ok(ConsolidationOutcome::noop())
            }
        }
    }

    /// The guarded consolidation body: two promotion sweeps, then one
    /// persistence commit. Runs only while a guard admission is held.
    async fn run_consolidation(inner: &ManagerInner) -> Result<ConsolidationOutcome> {
        let mut outcome = ConsolidationOutcome {
            ran: true,
            ..Default::default()
        };

        // Upper sweep first so a record promoted out of Recent waits one
        // full cycle in Derived instead of cascading straight through.
        outcome.absorb(Self::promote_sweep(
            &inner.derived,
            &inner.consolidated,
            inner.thresholds.consolidate_min_significance,
        ));
        outcome.absorb(Self::promote_sweep(
            &inner.recent,
            &inner.derived,
            inner.thresholds.promote_min_significance,
        ));

        inner.persist_tiers().await?;

        info!(
            promoted = outcome.promoted,
            merged = outcome.merged,
            skipped = outcome.skipped,
            "consolidation completed"
        );
        Ok(outcome)
    }

    /// Promote qualifying records from `lower` into `higher`.
    ///
    /// Mutations are staged in memory only; persistence happens once at
    /// the end of the run body, and the resolver's idempotence makes a
    /// re-run after a dropped run converge instead of duplicating.
    fn promote_sweep(
        lower: &RwLock<TierStore>,
        higher: &RwLock<TierStore>,
        min_significance: f32,
    ) -> ConsolidationOutcome {
        let (candidates, skipped) = {
            let lower = lower.read().unwrap();
            let mut candidates = Vec::new();
            let mut skipped = 0usize;
            for record in lower.iter() {
                if record.significance >= min_significance {
                    let mut promoted = record.clone();
                    promoted.touch();
                    candidates.push(promoted);
                } else {
                    skipped += 1;
                }
            }
            (candidates, skipped)
        };

        if candidates.is_empty() {
            return ConsolidationOutcome {
                skipped,
                ran: true,
                ..Default::default()
            };
        }

        let resolution = {
            let higher = higher.read().unwrap();
            let existing: Vec<Record> = higher.iter().cloned().collect();
            resolve(&candidates, &existing)
        };

        {
            let mut higher = higher.write().unwrap();
            for record in resolution.records {
                higher.put(record);
            }
        }
        {
            let mut lower = lower.write().unwrap();
            for candidate in &candidates {
                lower.delete(candidate.id);
            }
        }

        ConsolidationOutcome {
            promoted: candidates.len(),
            merged: resolution.merged,
            skipped,
            ran: true,
        }
    }

    /// Persist every tier through the blob store
    pub async fn save(&self) -> Result<()> {
        self.inner.persist_tiers().await
    }

    /// Reload every tier from the blob store, replacing in-memory state
    pub async fn load(&self) -> Result<()> {
        for tier in MemoryTier::all() {
            let bytes = self.inner.blobs.read_blob(tier.blob_key()).await?;
            let store = self.inner.tier(tier);
            let mut store = store.write().unwrap();
            match bytes {
                Some(bytes) => store.restore_bytes(&bytes)?,
                None => store.clear(),
            }
        }
        Ok(())
    }

    /// Guard statistics and health
    pub fn stats(&self) -> GuardStats {
        self.inner.guard.stats()
    }

    /// Clear all tiers and guard state. Test support.
    pub fn reset(&self) {
        for tier in MemoryTier::all() {
            self.inner.tier(tier).write().unwrap().clear();
        }
        self.inner.guard.reset();
    }

    /// Reject pending consolidations, force-release any active run, and
    /// persist the tiers.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.guard.shutdown();
        self.inner.persist_tiers().await
    }
}

impl ManagerInner {
    fn tier(&self, tier: MemoryTier) -> &RwLock<TierStore> {
        match tier {
            MemoryTier::Recent => &self.recent,
            MemoryTier::Derived => &self.derived,
            MemoryTier::Consolidated => &self.consolidated,
        }
    }

    async fn persist_tiers(&self) -> Result<()> {
        // Snapshot under the locks, write after releasing them.
        let mut blobs = Vec::with_capacity(3);
        for tier in MemoryTier::all() {
            let bytes = self.tier(tier).read().unwrap().snapshot_bytes()?;
            blobs.push((tier.blob_key(), bytes));
        }
        for (key, bytes) in blobs {
            self.blobs.write_blob(key, &bytes).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{RecordKind, RecordSource};
    use crate::storage::blob::MemoryBlobStore;

    fn manager() -> MemoryManager {
        MemoryManager::new(Arc::new(MemoryBlobStore::new()), Config::default())
    }

    fn record(content: &str, significance: f32) -> Record {
        Record::new(
            content.to_string(),
            RecordKind::SceneSummary,
            RecordSource::Generation,
        )
        .with_significance(significance)
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let manager = manager();
        let r = record("the harbor gate is sealed", 0.5);
        let id = r.id;

        manager.put(MemoryTier::Recent, r);
        assert_eq!(manager.len(MemoryTier::Recent), 1);
        assert_eq!(
            manager.get(MemoryTier::Recent, id).unwrap().content,
            "the harbor gate is sealed"
        );

        assert!(manager.delete(MemoryTier::Recent, id));
        assert!(!manager.delete(MemoryTier::Recent, id));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_consolidate_promotes_and_deletes() {
        let manager = manager();
        let keep = record("low significance", 0.1);
        let promote = record("high significance", 0.6);
        let promote_id = promote.id;

        manager.put(MemoryTier::Recent, keep);
        manager.put(MemoryTier::Recent, promote);

        let outcome = manager.consolidate("pipelineA").await.unwrap();
        assert!(outcome.ran);
        assert_eq!(outcome.promoted, 1);
        assert_eq!(outcome.skipped, 1);

        assert!(manager.get(MemoryTier::Recent, promote_id).is_none());
        assert_eq!(
            manager.get(MemoryTier::Derived, promote_id).unwrap().tier,
            MemoryTier::Derived
        );
        assert_eq!(manager.len(MemoryTier::Recent), 1);
    }

    #[tokio::test]
    async fn test_two_sweeps_reach_consolidated() {
        let manager = manager();
        // Significance 0.9 clears both thresholds, so one run moves it
        // Recent -> Derived and a second run Derived -> Consolidated.
        let r = record("the heir is an impostor", 0.9);
        let id = r.id;
        manager.put(MemoryTier::Recent, r);

        manager.consolidate("pipelineA").await.unwrap();
        assert!(manager.get(MemoryTier::Derived, id).is_some());

        manager.consolidate("pipelineA").await.unwrap();
        assert!(manager.get(MemoryTier::Derived, id).is_none());
        assert!(manager.get(MemoryTier::Consolidated, id).is_some());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let manager = MemoryManager::new(blobs.clone(), Config::default());
        let r = record("persisted", 0.5);
        let id = r.id;
        manager.put(MemoryTier::Derived, r);
        manager.save().await.unwrap();

        let restored = MemoryManager::new(blobs, Config::default());
        restored.load().await.unwrap();
        assert_eq!(restored.get(MemoryTier::Derived, id).unwrap().content, "persisted");
    }
}
