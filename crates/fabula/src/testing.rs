//! Test utilities for fabula - shared fixtures and builders
//!
//! Provides deterministic record builders and an in-memory manager
//! fixture so integration tests avoid touching the filesystem.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::Config;
use crate::manager::MemoryManager;
use crate::memory::types::{Record, RecordKind, RecordSource};
use crate::storage::blob::MemoryBlobStore;

/// Build a Recent-tier record with the given content and significance
pub fn make_record(content: &str, significance: f32) -> Record {
    Record::new(
        content.to_string(),
        RecordKind::SceneSummary,
        RecordSource::Generation,
    )
    .with_significance(significance)
}

/// Build a record whose `created_at` lies `age_minutes` in the past.
///
/// Useful for exercising FIFO eviction order deterministically.
pub fn make_aged_record(content: &str, significance: f32, age_minutes: i64) -> Record {
    let mut record = make_record(content, significance);
    record.created_at = Utc::now() - Duration::minutes(age_minutes);
    record.updated_at = record.created_at;
    record
}

/// A manager over an in-memory blob store with default configuration
pub fn memory_manager() -> MemoryManager {
    memory_manager_with_config(Config::default())
}

/// A manager over an in-memory blob store with the given configuration
pub fn memory_manager_with_config(config: Config) -> MemoryManager {
    MemoryManager::new(Arc::new(MemoryBlobStore::new()), config)
}
