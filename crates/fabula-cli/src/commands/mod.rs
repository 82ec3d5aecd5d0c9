pub mod consolidate;
pub mod record;
pub mod stats;

pub use consolidate::ConsolidateCommand;
pub use record::RecordCommand;
pub use stats::StatsCommand;
