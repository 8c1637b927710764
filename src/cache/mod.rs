//! Artifact cache
//!
//! Tracks downloaded files by logical key inside one directory, keeping the
//! total size under a fixed budget with LRU eviction.

pub mod caching_info;
pub mod errors;
pub mod file_cache;
pub mod sweep;

pub use caching_info::CachingInfo;
pub use errors::CacheError;
pub use file_cache::{AddOutcome, CacheStats, FileCache};
pub use sweep::{sweep_orphans, SweepStats};
