pub mod blob;
pub mod file;
pub mod filter;
pub mod tier;

pub use blob::{BlobStore, MemoryBlobStore};
pub use file::FileBlobStore;
pub use filter::RecordFilter;
pub use tier::TierStore;
