//! Record types and helpers for the memory hierarchy

pub mod types;

pub use types::{MemoryTier, Record, RecordKind, RecordSource};
