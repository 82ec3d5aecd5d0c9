//! Filter types for record queries
//!
//! Provides filtering for tier queries, allowing lookups to be narrowed
//! by kind, significance, time, chapter, and character.

use chrono::{DateTime, Utc};

use crate::memory::types::{Record, RecordKind};

/// Filter criteria for record queries.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Filter by specific record kinds (OR logic within this filter)
    pub kinds: Option<Vec<RecordKind>>,
    /// Minimum significance threshold (inclusive)
    pub min_significance: Option<f32>,
    /// Only return records created after this time
    pub since: Option<DateTime<Utc>>,
    /// Filter to a specific chapter
    pub chapter: Option<u32>,
    /// Filter to records mentioning a specific character id
    pub character: Option<String>,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by record kinds
    pub fn with_kinds(mut self, kinds: Vec<RecordKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Filter by minimum significance
    pub fn with_min_significance(mut self, min_significance: f32) -> Self {
        self.min_significance = Some(min_significance);
        self
    }

    /// Filter by creation time
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Filter by chapter number
    pub fn with_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    /// Filter by character id
    pub fn with_character(mut self, character: impl Into<String>) -> Self {
        self.character = Some(character.into());
        self
    }

    /// Check whether `record` satisfies every set criterion
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.is_empty() && !kinds.contains(&record.kind) {
                return false;
            }
        }

        if let Some(min) = self.min_significance {
            if record.significance < min {
                return false;
            }
        }

        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }

        if let Some(chapter) = self.chapter {
            if record.chapter != Some(chapter) {
                return false;
            }
        }

        if let Some(ref character) = self.character {
            if !record.characters.iter().any(|c| c == character) {
                return false;
            }
        }

        true
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.kinds.is_none()
            && self.min_significance.is_none()
            && self.since.is_none()
            && self.chapter.is_none()
            && self.character.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::RecordSource;
    use chrono::Duration;

    fn record(kind: RecordKind, significance: f32) -> Record {
        Record::new("content".to_string(), kind, RecordSource::Analysis)
            .with_significance(significance)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RecordFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&record(RecordKind::SceneSummary, 0.1)));
        assert!(filter.matches(&record(RecordKind::StyleNote, 0.9)));
    }

    #[test]
    fn test_kind_filter() {
        let filter = RecordFilter::new()
            .with_kinds(vec![RecordKind::CharacterFact, RecordKind::PlotThread]);

        assert!(filter.matches(&record(RecordKind::CharacterFact, 0.5)));
        assert!(filter.matches(&record(RecordKind::PlotThread, 0.5)));
        assert!(!filter.matches(&record(RecordKind::SceneSummary, 0.5)));
    }

    #[test]
    fn test_min_significance_filter() {
        let filter = RecordFilter::new().with_min_significance(0.6);

        assert!(filter.matches(&record(RecordKind::SceneSummary, 0.6)));
        assert!(filter.matches(&record(RecordKind::SceneSummary, 0.9)));
        assert!(!filter.matches(&record(RecordKind::SceneSummary, 0.59)));
    }

    #[test]
    fn test_since_filter() {
        let filter = RecordFilter::new().since(Utc::now() - Duration::hours(1));

        let fresh = record(RecordKind::SceneSummary, 0.5);
        assert!(filter.matches(&fresh));

        let mut stale = record(RecordKind::SceneSummary, 0.5);
        stale.created_at = Utc::now() - Duration::hours(2);
        assert!(!filter.matches(&stale));
    }

    #[test]
    fn test_chapter_and_character_filters() {
        let filter = RecordFilter::new().with_chapter(3).with_character("mira");

        let matching = record(RecordKind::CharacterFact, 0.5)
            .with_chapter(3)
            .with_characters(vec!["mira".to_string()]);
        assert!(filter.matches(&matching));

        let wrong_chapter = record(RecordKind::CharacterFact, 0.5)
            .with_chapter(4)
            .with_characters(vec!["mira".to_string()]);
        assert!(!filter.matches(&wrong_chapter));

        let wrong_character = record(RecordKind::CharacterFact, 0.5)
            .with_chapter(3)
            .with_characters(vec!["tomas".to_string()]);
        assert!(!filter.matches(&wrong_character));

        let no_chapter = record(RecordKind::CharacterFact, 0.5)
            .with_characters(vec!["mira".to_string()]);
        assert!(!filter.matches(&no_chapter));
    }

    #[test]
    fn test_combined_filters_are_and() {
        let filter = RecordFilter::new()
            .with_kinds(vec![RecordKind::PlotThread])
            .with_min_significance(0.7);

        assert!(filter.matches(&record(RecordKind::PlotThread, 0.8)));
        assert!(!filter.matches(&record(RecordKind::PlotThread, 0.5)));
        assert!(!filter.matches(&record(RecordKind::SceneSummary, 0.8)));
    }
}
