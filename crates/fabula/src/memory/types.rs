//! Record types for the Fabula memory hierarchy
//!
//! Defines the core data structures for storing derived knowledge about
//! generated fiction, including the main Record struct and supporting
//! enums for tier placement and classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single unit of derived knowledge stored in a memory tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, stable across tiers during promotion
    pub id: Uuid,
    /// Which memory tier this record currently lives in
    pub tier: MemoryTier,
    /// Classification of what kind of knowledge this is
    pub kind: RecordKind,
    /// The actual content of the record
    pub content: String,
    /// Chapter number this record relates to, if any
    pub chapter: Option<u32>,
    /// Character ids mentioned by this record
    pub characters: Vec<String>,
    /// Where this record originated from
    pub source: RecordSource,
    /// Importance score in [0.0, 1.0]; never regressed by consolidation
    pub significance: f32,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// When this record was last modified
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a new record in the Recent tier with default significance
    pub fn new(content: String, kind: RecordKind, source: RecordSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tier: MemoryTier::Recent,
            kind,
            content,
            chapter: None,
            characters: Vec::new(),
            source,
            significance: 0.5,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a chapter number
    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    /// Attach character ids
    pub fn with_characters(mut self, characters: Vec<String>) -> Self {
        self.characters = characters;
        self
    }

    /// Set the significance, clamped to [0.0, 1.0]
    pub fn with_significance(mut self, significance: f32) -> Self {
        self.significance = significance.clamp(0.0, 1.0);
        self
    }

    /// Update the significance of this record, clamped to [0.0, 1.0]
    pub fn set_significance(&mut self, significance: f32) {
        self.significance = significance.clamp(0.0, 1.0);
    }

    /// Mark this record as modified, bumping `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One level of the memory hierarchy, ordered coldest-retention first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// Raw recent generation output; hard capacity, oldest evicted
    Recent,
    /// Rolling analysis results; pruned only by consolidation
    Derived,
    /// Long-lived consolidated story facts
    Consolidated,
}

impl MemoryTier {
    /// The tier records in this tier are promoted into, if any
    pub fn next(self) -> Option<MemoryTier> {
        match self {
            MemoryTier::Recent => Some(MemoryTier::Derived),
            MemoryTier::Derived => Some(MemoryTier::Consolidated),
            MemoryTier::Consolidated => None,
        }
    }

    /// Stable key used for persistence blobs
    pub fn blob_key(self) -> &'static str {
        match self {
            MemoryTier::Recent => "tier/recent",
            MemoryTier::Derived => "tier/derived",
            MemoryTier::Consolidated => "tier/consolidated",
        }
    }

    /// All tiers, coldest-retention first
    pub fn all() -> [MemoryTier; 3] {
        [
            MemoryTier::Recent,
            MemoryTier::Derived,
            MemoryTier::Consolidated,
        ]
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryTier::Recent => write!(f, "recent"),
            MemoryTier::Derived => write!(f, "derived"),
            MemoryTier::Consolidated => write!(f, "consolidated"),
        }
    }
}

/// Classification of derived knowledge about the story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// What happened in a scene or chapter
    SceneSummary,
    /// A fact about a character
    CharacterFact,
    /// An open or resolved plot thread
    PlotThread,
    /// Setting and world-building detail
    WorldDetail,
    /// Voice, tone, and style observations
    StyleNote,
}

/// Source of the record - where it originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordSource {
    /// Produced directly by a generation pass
    Generation,
    /// Produced by a rolling analysis pass
    Analysis,
    /// Produced by merging records during consolidation
    Consolidation,
    /// Manually added
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_new_defaults() {
        let record = Record::new(
            "Mira finds the ledger".to_string(),
            RecordKind::SceneSummary,
            RecordSource::Generation,
        );

        assert_eq!(record.tier, MemoryTier::Recent);
        assert_eq!(record.significance, 0.5);
        assert!(record.chapter.is_none());
        assert!(record.characters.is_empty());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_record_builders() {
        let record = Record::new(
            "Mira distrusts the harbormaster".to_string(),
            RecordKind::CharacterFact,
            RecordSource::Analysis,
        )
        .with_chapter(3)
        .with_characters(vec!["mira".to_string(), "harbormaster".to_string()])
        .with_significance(0.9);

        assert_eq!(record.chapter, Some(3));
        assert_eq!(record.characters.len(), 2);
        assert_eq!(record.significance, 0.9);
    }

    #[test]
    fn test_significance_clamping() {
        let mut record = Record::new(
            "Test".to_string(),
            RecordKind::StyleNote,
            RecordSource::Manual,
        );

        record.set_significance(1.5);
        assert_eq!(record.significance, 1.0);

        record.set_significance(-0.5);
        assert_eq!(record.significance, 0.0);
    }

    #[test]
    fn test_tier_ordering_and_next() {
        assert!(MemoryTier::Recent < MemoryTier::Derived);
        assert!(MemoryTier::Derived < MemoryTier::Consolidated);
        assert_eq!(MemoryTier::Recent.next(), Some(MemoryTier::Derived));
        assert_eq!(MemoryTier::Derived.next(), Some(MemoryTier::Consolidated));
        assert_eq!(MemoryTier::Consolidated.next(), None);
    }

    #[test]
    fn test_record_serialization() {
        let record = Record::new(
            "The storm breaks over Calder's Reach".to_string(),
            RecordKind::WorldDetail,
            RecordSource::Generation,
        )
        .with_chapter(7);

        let json = serde_json::to_string(&record).expect("Failed to serialize record");
        let deserialized: Record =
            serde_json::from_str(&json).expect("Failed to deserialize record");

        assert_eq!(record.id, deserialized.id);
        assert_eq!(record.content, deserialized.content);
        assert_eq!(record.tier, deserialized.tier);
        assert_eq!(record.kind, deserialized.kind);
        assert_eq!(record.chapter, deserialized.chapter);
    }
}
