//! Duplicate and conflict resolution for tier promotion
//!
//! Pure merge logic with no knowledge of the guard; it is only ever called
//! from within a guard-protected consolidation run.

use std::collections::HashMap;

use uuid::Uuid;

use crate::memory::types::Record;

/// Result of resolving a candidate batch against a tier's existing records.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// The full resolved record set for the target tier
    pub records: Vec<Record>,
    /// Candidates that merged with an existing record of the same id
    pub merged: usize,
    /// Candidates inserted with no existing counterpart
    pub inserted: usize,
}

/// Merge `candidates` into `existing` by record id.
///
/// When a candidate and an existing record share an id, the one with the
/// later `updated_at` wins field-wise, but `significance` is the max of the
/// two - importance never regresses. Candidates with no counterpart are
/// inserted unchanged; existing records with no candidate pass through
/// unchanged. Idempotent: resolving the same batch twice neither duplicates
/// records nor lowers significance.
pub fn resolve(candidates: &[Record], existing: &[Record]) -> Resolution {
    let mut by_id: HashMap<Uuid, Record> = HashMap::with_capacity(existing.len());
    for record in existing {
        // Later duplicate within one slice wins, same rule as across slices.
        match by_id.remove(&record.id) {
            Some(previous) => {
                by_id.insert(record.id, merge_pair(previous, record.clone()));
            }
            None => {
                by_id.insert(record.id, record.clone());
            }
        }
    }

    let mut merged = 0;
    let mut inserted = 0;
    for candidate in candidates {
        match by_id.remove(&candidate.id) {
            Some(current) => {
                merged += 1;
                by_id.insert(candidate.id, merge_pair(current, candidate.clone()));
            }
            None => {
                inserted += 1;
                by_id.insert(candidate.id, candidate.clone());
            }
        }
    }

    let mut records: Vec<Record> = by_id.into_values().collect();
    records.sort_by_key(|r| (r.created_at, r.id));

    Resolution {
        records,
        merged,
        inserted,
    }
}

fn merge_pair(a: Record, b: Record) -> Record {
    let significance = a.significance.max(b.significance);
    let mut winner = if b.updated_at >= a.updated_at { b } else { a };
    winner.significance = significance;
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{RecordKind, RecordSource};
    use chrono::{Duration, Utc};

    fn record(content: &str, significance: f32) -> Record {
        Record::new(
            content.to_string(),
            RecordKind::CharacterFact,
            RecordSource::Analysis,
        )
        .with_significance(significance)
    }

    fn ids(resolution: &Resolution) -> Vec<uuid::Uuid> {
        let mut ids: Vec<_> = resolution.records.iter().map(|r| r.id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_disjoint_sets_union() {
        let a = record("a", 0.5);
        let b = record("b", 0.6);

        let resolution = resolve(std::slice::from_ref(&a), std::slice::from_ref(&b));
        assert_eq!(resolution.records.len(), 2);
        assert_eq!(resolution.merged, 0);
        assert_eq!(resolution.inserted, 1);
    }

    #[test]
    fn test_later_update_wins_content() {
        let mut old = record("old content", 0.9);
        old.updated_at = Utc::now() - Duration::hours(1);

        let mut new = record("new content", 0.4);
        new.id = old.id;
        new.updated_at = Utc::now();

        let resolution = resolve(std::slice::from_ref(&new), std::slice::from_ref(&old));
        assert_eq!(resolution.records.len(), 1);
        assert_eq!(resolution.merged, 1);
        assert_eq!(resolution.records[0].content, "new content");
        // Significance never regresses.
        assert_eq!(resolution.records[0].significance, 0.9);
    }

    #[test]
    fn test_stale_candidate_loses_content_keeps_max_significance() {
        let mut existing = record("current", 0.3);
        existing.updated_at = Utc::now();

        let mut stale = record("stale", 0.8);
        stale.id = existing.id;
        stale.updated_at = Utc::now() - Duration::hours(2);

        let resolution = resolve(std::slice::from_ref(&stale), std::slice::from_ref(&existing));
        assert_eq!(resolution.records[0].content, "current");
        assert_eq!(resolution.records[0].significance, 0.8);
    }

    #[test]
    fn test_self_merge_is_identity() {
        let set = vec![record("a", 0.2), record("b", 0.7), record("c", 1.0)];

        let resolution = resolve(&set, &set);
        assert_eq!(resolution.records.len(), 3);
        assert_eq!(resolution.merged, 3);
        assert_eq!(resolution.inserted, 0);
        for original in &set {
            let resolved = resolution
                .records
                .iter()
                .find(|r| r.id == original.id)
                .unwrap();
            assert_eq!(resolved.content, original.content);
            assert_eq!(resolved.significance, original.significance);
        }
    }

    #[test]
    fn test_associative_up_to_record_sets() {
        let mut shared = record("shared", 0.4);
        shared.updated_at = Utc::now() - Duration::hours(3);

        let mut shared_newer = record("shared newer", 0.6);
        shared_newer.id = shared.id;
        shared_newer.updated_at = Utc::now() - Duration::hours(1);

        let a = vec![record("a", 0.5), shared_newer];
        let b = vec![record("b", 0.9), shared];
        let c = vec![record("c", 0.1)];

        let left = resolve(&resolve(&a, &b).records, &c);
        let right = resolve(&a, &resolve(&b, &c).records);

        assert_eq!(ids(&left), ids(&right));
        for l in &left.records {
            let r = right.records.iter().find(|r| r.id == l.id).unwrap();
            assert_eq!(l.content, r.content);
            assert_eq!(l.significance, r.significance);
        }
    }

    #[test]
    fn test_empty_candidates_pass_existing_through() {
        let existing = vec![record("keep", 0.5)];
        let resolution = resolve(&[], &existing);
        assert_eq!(resolution.records.len(), 1);
        assert_eq!(resolution.merged, 0);
        assert_eq!(resolution.inserted, 0);
    }
}
