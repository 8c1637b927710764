//! Orphan sweep over the cache directory
//!
//! Files left behind by a previous process, or by a crash between adoption
//! and indexing, are not tracked by any entry. The sweep hands every path in
//! the cache directory to `remove_file_if_untracked`, which decides under the
//! cache lock.

use std::fs;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::file_cache::FileCache;

/// Counts from a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Untracked paths deleted
    pub removed: usize,
    /// Paths kept because a live entry owns them
    pub retained: usize,
    /// Untracked paths that could not be deleted
    pub failed: usize,
}

/// Remove every untracked path directly inside the cache directory
pub fn sweep_orphans<I: Clone>(cache: &FileCache<I>) -> Result<SweepStats> {
    let cache_dir = cache.cache_dir();
    let read_dir = fs::read_dir(cache_dir)
        .with_context(|| format!("Failed to list cache directory: {:?}", cache_dir))?;

    let mut stats = SweepStats::default();
    for dir_entry in read_dir {
        let path = match dir_entry {
            Ok(dir_entry) => dir_entry.path(),
            Err(e) => {
                warn!(error = %e, "Failed to read cache directory entry");
                stats.failed += 1;
                continue;
            }
        };

        match cache.remove_file_if_untracked(&path) {
            Ok(true) => {
                debug!(path = %path.display(), "Removed orphaned file");
                stats.removed += 1;
            }
            // Tracked, or deleted by someone else since listing
            Ok(false) => stats.retained += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned file");
                stats.failed += 1;
            }
        }
    }

    info!(
        removed = stats.removed,
        retained = stats.retained,
        failed = stats.failed,
        "Cache sweep finished"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachingInfo;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_keeps_tracked_and_removes_orphans() {
        let root = TempDir::new().unwrap();
        let cache: FileCache =
            FileCache::with_config(root.path().join("cache"), 1024).unwrap();

        let staged = root.path().join("blob");
        fs::write(&staged, b"payload").unwrap();
        cache.add("k", &staged, 7, CachingInfo::default()).unwrap();

        let orphan = cache.cache_dir().join("left-over");
        fs::write(&orphan, b"stale").unwrap();
        fs::create_dir_all(cache.cache_dir().join("half-done").join("inner")).unwrap();

        let stats = sweep_orphans(&cache).unwrap();

        assert_eq!(stats.removed, 2);
        assert_eq!(stats.retained, 1);
        assert_eq!(stats.failed, 0);
        assert!(!orphan.exists());
        assert!(cache.path_for_key("k").unwrap().exists());
    }

    #[test]
    fn test_sweep_after_restart_reclaims_everything() {
        let root = TempDir::new().unwrap();
        let cache_dir = root.path().join("cache");
        {
            let cache: FileCache = FileCache::with_config(cache_dir.clone(), 1024).unwrap();
            let staged = root.path().join("blob");
            fs::write(&staged, b"payload").unwrap();
            cache.add("k", &staged, 7, CachingInfo::default()).unwrap();
        }

        let restarted: FileCache = FileCache::with_config(cache_dir.clone(), 1024).unwrap();
        let stats = sweep_orphans(&restarted).unwrap();

        assert_eq!(stats.removed, 1);
        assert_eq!(fs::read_dir(&cache_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_empty_directory() {
        let root = TempDir::new().unwrap();
        let cache: FileCache = FileCache::with_config(root.path().join("cache"), 1024).unwrap();
        assert_eq!(sweep_orphans(&cache).unwrap(), SweepStats::default());
    }
}
