use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FabulaError, Result};

/// Main configuration structure for Fabula
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration (tier capacities, data directory)
    #[serde(default)]
    pub storage: StorageConfig,
    /// Consolidation guard configuration
    #[serde(default)]
    pub guard: GuardConfig,
    /// Consolidation promotion thresholds
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FabulaError::Config(format!("Failed to read {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| FabulaError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => Err(FabulaError::Config(format!(
                "Config file not found: {}",
                p.display()
            ))),
            None => Ok(Self::default()),
        }
    }
}

/// Storage tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Hard capacity of the Recent tier (oldest evicted on overflow)
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    /// Base directory for persisted tier blobs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recent_capacity: default_recent_capacity(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_recent_capacity() -> usize {
    64
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".fabula"))
        .unwrap_or_else(|| PathBuf::from(".fabula"))
}

/// Consolidation guard configuration
///
/// The run timeout and queue limits are process-wide constants; callers
/// cannot override them per call.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Seconds before an active run is force-released
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Maximum nesting depth for the active run chain
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Maximum number of deferred consolidation requests
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Minimum priority for a blocked caller to be offered queueing
    #[serde(default = "default_queue_priority_threshold")]
    pub queue_priority_threshold: u8,
    /// Retries for a failed queued operation before it is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Milliseconds between consecutive drained queue entries
    #[serde(default = "default_drain_pause_ms")]
    pub drain_pause_ms: u64,
    /// Milliseconds to back off when the queue is still contended
    #[serde(default = "default_drain_backoff_ms")]
    pub drain_backoff_ms: u64,
}

impl GuardConfig {
    /// Run timeout as a [`Duration`]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Inter-item drain pause as a [`Duration`]
    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    /// Drain contention backoff as a [`Duration`]
    pub fn drain_backoff(&self) -> Duration {
        Duration::from_millis(self.drain_backoff_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            max_call_depth: default_max_call_depth(),
            queue_capacity: default_queue_capacity(),
            queue_priority_threshold: default_queue_priority_threshold(),
            max_retries: default_max_retries(),
            drain_pause_ms: default_drain_pause_ms(),
            drain_backoff_ms: default_drain_backoff_ms(),
        }
    }
}

fn default_run_timeout_secs() -> u64 {
    45
}

fn default_max_call_depth() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    32
}

fn default_queue_priority_threshold() -> u8 {
    7
}

fn default_max_retries() -> u32 {
    2
}

fn default_drain_pause_ms() -> u64 {
    25
}

fn default_drain_backoff_ms() -> u64 {
    250
}

/// Consolidation promotion thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Minimum significance for Recent records to be promoted to Derived
    #[serde(default = "default_promote_min_significance")]
    pub promote_min_significance: f32,
    /// Minimum significance for Derived records to be promoted to Consolidated
    #[serde(default = "default_consolidate_min_significance")]
    pub consolidate_min_significance: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            promote_min_significance: default_promote_min_significance(),
            consolidate_min_significance: default_consolidate_min_significance(),
        }
    }
}

fn default_promote_min_significance() -> f32 {
    0.35
}

fn default_consolidate_min_significance() -> f32 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.recent_capacity, 64);
        assert_eq!(config.guard.run_timeout_secs, 45);
        assert_eq!(config.guard.max_call_depth, 4);
        assert_eq!(config.guard.queue_capacity, 32);
        assert_eq!(config.guard.queue_priority_threshold, 7);
        assert_eq!(config.guard.max_retries, 2);
        assert_eq!(config.consolidation.promote_min_significance, 0.35);
        assert_eq!(config.consolidation.consolidate_min_significance, 0.8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [guard]
            run_timeout_secs = 30

            [storage]
            recent_capacity = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.guard.run_timeout_secs, 30);
        assert_eq!(config.guard.queue_capacity, 32);
        assert_eq!(config.storage.recent_capacity, 10);
        assert_eq!(config.consolidation.promote_min_significance, 0.35);
    }

    #[test]
    fn test_duration_helpers() {
        let guard = GuardConfig::default();
        assert_eq!(guard.run_timeout(), Duration::from_secs(45));
        assert_eq!(guard.drain_pause(), Duration::from_millis(25));
        assert_eq!(guard.drain_backoff(), Duration::from_millis(250));
    }
}
