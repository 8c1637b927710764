//! Artifact Cache - disk-backed LRU cache for downloaded artifacts
//!
//! Downloaders fetch remote content into a staging file and hand it to a
//! [`FileCache`], which moves it into the cache directory, tracks it by
//! logical key, and evicts least recently used entries to stay within a
//! fixed byte budget.

pub mod cache;
pub mod config;
pub mod ipc;

pub use cache::{AddOutcome, CacheError, CacheStats, CachingInfo, FileCache};
pub use config::CacheConfig;
