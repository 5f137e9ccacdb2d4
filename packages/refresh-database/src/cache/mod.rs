//! Cache stores for the staleness marker.

mod file;
mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

/// Logical store name, kept apart from any application cache.
pub const DEFAULT_STORE_NAME: &str = "refresh-database";
