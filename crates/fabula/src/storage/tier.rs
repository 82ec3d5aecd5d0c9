//! Per-tier record storage
//!
//! Each tier holds its records in an in-memory index with chapter and
//! character secondary indexes. Get/put/delete/query are synchronous;
//! only `save`/`load` touch the injected persistence collaborator, so
//! callers may defer or batch persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;
use uuid::Uuid;

use crate::error::{FabulaError, Result};
use crate::memory::types::{MemoryTier, Record};
use crate::storage::blob::BlobStore;
use crate::storage::filter::RecordFilter;

/// In-memory store for one memory tier.
///
/// The Recent tier carries a hard capacity; `evict_overflow` removes the
/// oldest records (FIFO by `created_at`) beyond it. Derived and
/// Consolidated are unbounded and pruned only by consolidation.
#[derive(Debug)]
pub struct TierStore {
    tier: MemoryTier,
    capacity: Option<usize>,
    records: HashMap<Uuid, Record>,
    by_chapter: BTreeMap<u32, BTreeSet<Uuid>>,
    by_character: HashMap<String, BTreeSet<Uuid>>,
}

impl TierStore {
    /// Create an unbounded store for `tier`
    pub fn new(tier: MemoryTier) -> Self {
        Self {
            tier,
            capacity: None,
            records: HashMap::new(),
            by_chapter: BTreeMap::new(),
            by_character: HashMap::new(),
        }
    }

    /// Create a store with a hard record capacity
    pub fn with_capacity(tier: MemoryTier, capacity: usize) -> Self {
        let mut store = Self::new(tier);
        store.capacity = Some(capacity);
        store
    }

    /// Which tier this store holds
    pub fn tier(&self) -> MemoryTier {
        self.tier
    }

    /// Configured hard capacity, if any
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of records currently stored
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record by id
    pub fn get(&self, id: Uuid) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Insert or replace a record.
    ///
    /// The record's tier field is stamped to this store's tier. Callers
    /// inserting into the Recent tier should follow up with
    /// [`evict_overflow`](Self::evict_overflow).
    pub fn put(&mut self, mut record: Record) {
        record.tier = self.tier;
        if let Some(previous) = self.records.remove(&record.id) {
            self.unindex(&previous);
        }
        self.index(&record);
        self.records.insert(record.id, record);
    }

    /// Remove a record by id, returning it if present
    pub fn delete(&mut self, id: Uuid) -> Option<Record> {
        let removed = self.records.remove(&id);
        if let Some(ref record) = removed {
            self.unindex(record);
        }
        removed
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.by_chapter.clear();
        self.by_character.clear();
    }

    /// Iterate records matching `filter`.
    ///
    /// The iterator is lazy and restartable: it borrows the store and can
    /// be recreated at any time. Chapter and character criteria are served
    /// from the secondary indexes.
    pub fn query<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
        // Narrow by the most selective index available before scanning.
        if let Some(chapter) = filter.chapter {
            let ids = self.by_chapter.get(&chapter);
            return Box::new(
                ids.into_iter()
                    .flatten()
                    .filter_map(move |id| self.records.get(id))
                    .filter(move |r| filter.matches(r)),
            );
        }

        if let Some(ref character) = filter.character {
            let ids = self.by_character.get(character);
            return Box::new(
                ids.into_iter()
                    .flatten()
                    .filter_map(move |id| self.records.get(id))
                    .filter(move |r| filter.matches(r)),
            );
        }

        Box::new(self.records.values().filter(move |r| filter.matches(r)))
    }

    /// Iterate all records in this tier
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Evict the oldest records beyond capacity (FIFO by `created_at`).
    ///
    /// Returns the evicted records, oldest first. No-op for unbounded
    /// tiers.
    pub fn evict_overflow(&mut self) -> Vec<Record> {
        let Some(capacity) = self.capacity else {
            return Vec::new();
        };
        if self.records.len() <= capacity {
            return Vec::new();
        }

        let overflow = self.records.len() - capacity;
        let mut victims: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = self
            .records
            .values()
            .map(|r| (r.created_at, r.id))
            .collect();
        victims.sort();

        let evicted: Vec<Record> = victims
            .into_iter()
            .take(overflow)
            .filter_map(|(_, id)| self.delete(id))
            .collect();

        debug!(
            tier = %self.tier,
            evicted = evicted.len(),
            remaining = self.records.len(),
            "evicted overflow records"
        );
        evicted
    }

    /// Serialize this tier's records to one JSON blob.
    ///
    /// Split from [`save`](Self::save) so callers holding a lock can
    /// snapshot synchronously and write the blob after releasing it.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        let mut records: Vec<&Record> = self.records.values().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(serde_json::to_vec(&records)?)
    }

    /// Replace this tier's contents from serialized blob bytes
    pub fn restore_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let records: Vec<Record> = serde_json::from_slice(bytes).map_err(|e| {
            FabulaError::Serialization(format!("Corrupt blob for tier {}: {e}", self.tier))
        })?;

        self.clear();
        for record in records {
            self.put(record);
        }
        Ok(())
    }

    /// Persist this tier as one JSON blob through `blobs`
    pub async fn save(&self, blobs: &dyn BlobStore) -> Result<()> {
        let bytes = self.snapshot_bytes()?;
        blobs.write_blob(self.tier.blob_key(), &bytes).await
    }

    /// Replace this tier's contents from its persisted blob.
    ///
    /// A missing blob loads as an empty tier.
    pub async fn load(&mut self, blobs: &dyn BlobStore) -> Result<()> {
        match blobs.read_blob(self.tier.blob_key()).await? {
            Some(bytes) => self.restore_bytes(&bytes),
            None => {
                self.clear();
                Ok(())
            }
        }
    }

    fn index(&mut self, record: &Record) {
        if let Some(chapter) = record.chapter {
            self.by_chapter.entry(chapter).or_default().insert(record.id);
        }
        for character in &record.characters {
            self.by_character
                .entry(character.clone())
                .or_default()
                .insert(record.id);
        }
    }

    fn unindex(&mut self, record: &Record) {
        if let Some(chapter) = record.chapter {
            if let Some(ids) = self.by_chapter.get_mut(&chapter) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.by_chapter.remove(&chapter);
                }
            }
        }
        for character in &record.characters {
            if let Some(ids) = self.by_character.get_mut(character) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.by_character.remove(character);
                }
            }
        }
    }
}
