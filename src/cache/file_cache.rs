//! Local File Cache
//!
//! Adopts downloaded artifacts from a staging area into the cache directory
//! and tracks them by logical key. Uses LRU eviction to keep the total size
//! within a fixed byte budget.
//!
//! Every public operation holds a single lock for its whole duration,
//! including the rename/remove calls it performs, so callers observe a total
//! order of operations.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::caching_info::CachingInfo;
use super::errors::CacheError;
use crate::config::CacheConfig;

/// Tracks a cached file's metadata for LRU eviction
#[derive(Debug, Clone)]
struct CacheEntry<I> {
    /// Path to the cached file on disk
    local_path: PathBuf,
    /// Size reported when the file was adopted
    size: u64,
    /// Last access time (creation or `record_access`)
    last_accessed: Instant,
    /// Orders accesses that land on the same clock reading
    access_seq: u64,
    /// Opaque validators handed back by `info`
    caching_info: I,
}

impl<I> CacheEntry<I> {
    fn recency(&self) -> (Instant, u64) {
        (self.last_accessed, self.access_seq)
    }
}

/// Outcome of handing a staging file to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The file now lives at `path` inside the cache directory
    Cached { path: PathBuf },
    /// The file is larger than the whole budget and was not adopted
    TooLarge,
}

impl AddOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self, AddOutcome::Cached { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            AddOutcome::Cached { path } => Some(path),
            AddOutcome::TooLarge => None,
        }
    }
}

/// Point-in-time view of cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub max_bytes: u64,
    /// Entries dropped to make room for new ones
    pub evictions: u64,
    /// Backing files that could not be deleted (left as orphans)
    pub failed_removals: u64,
}

/// Index state guarded by the cache lock
struct CacheState<I> {
    /// Logical key to entry
    entries: HashMap<String, CacheEntry<I>>,
    /// Physical path back to logical key, for orphan detection
    file_paths: HashMap<PathBuf, String>,
    used_bytes: u64,
    next_seq: u64,
    evictions: u64,
    failed_removals: u64,
}

impl<I> CacheState<I> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            file_paths: HashMap::new(),
            used_bytes: 0,
            next_seq: 0,
            evictions: 0,
            failed_removals: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Drop an entry together with its backing file
    ///
    /// Deleting the file is best-effort: a failure is logged and counted,
    /// the entry is gone from the index either way.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<I>> {
        let entry = self.entries.remove(key)?;
        self.file_paths.remove(&entry.local_path);
        self.used_bytes = self.used_bytes.saturating_sub(entry.size);

        if let Err(e) = remove_path(&entry.local_path) {
            self.failed_removals += 1;
            warn!(
                key = %key,
                path = %entry.local_path.display(),
                error = %e,
                "Failed to remove cached file"
            );
        }

        Some(entry)
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone())
    }

    /// Evict least recently used entries until `size` more bytes fit
    fn make_room(&mut self, size: u64, max_size: u64) {
        while self.used_bytes.saturating_add(size) > max_size {
            let Some(key) = self.oldest_key() else {
                break;
            };
            if let Some(entry) = self.remove_entry(&key) {
                self.evictions += 1;
                debug!(key = %key, size = entry.size, "Evicted cached file");
            }
        }
    }

    /// Tracked paths and directories cannot take a new file
    fn is_taken(&self, candidate: &Path) -> bool {
        self.file_paths.contains_key(candidate)
            || fs::symlink_metadata(candidate)
                .map(|metadata| metadata.is_dir())
                .unwrap_or(false)
    }

    /// Pick a destination for `file_name` inside `cache_dir`
    ///
    /// An untracked plain file already there is an orphan and gets replaced
    /// by the rename.
    fn destination_for(&self, cache_dir: &Path, file_name: &OsStr) -> PathBuf {
        let candidate = cache_dir.join(file_name);
        if !self.is_taken(&candidate) {
            return candidate;
        }

        let mut suffix: u64 = 1;
        loop {
            let mut name = file_name.to_os_string();
            name.push(format!("-{}", suffix));
            let candidate = cache_dir.join(name);
            if !self.is_taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Local disk cache for downloaded artifacts
pub struct FileCache<I = CachingInfo> {
    /// Root directory for cached files
    cache_dir: PathBuf,
    /// Maximum total cache size in bytes
    max_size: u64,
    /// Check the staging file length against the reported size on `add`
    verify_size: bool,
    state: Mutex<CacheState<I>>,
}

impl<I: Clone> FileCache<I> {
    /// Create a file cache rooted at `cache_dir`
    ///
    /// # Arguments
    /// * `cache_dir` - Directory to store cached files
    /// * `max_size` - Maximum total cache size in bytes
    pub fn with_config(cache_dir: PathBuf, max_size: u64) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", cache_dir))?;
        // Entry paths must be absolute and spelled the same way as sweep paths
        let cache_dir = fs::canonicalize(&cache_dir)
            .with_context(|| format!("Failed to resolve cache directory: {:?}", cache_dir))?;

        info!(
            cache_dir = %cache_dir.display(),
            max_size_mb = max_size / (1024 * 1024),
            "File cache initialized"
        );

        Ok(Self {
            cache_dir,
            max_size,
            verify_size: false,
            state: Mutex::new(CacheState::new()),
        })
    }

    /// Create a file cache from loaded configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self::with_config(config.cache_dir.clone(), config.max_size)?
            .with_size_verification(config.verify_size))
    }

    /// Reject staging files whose length differs from the reported size
    pub fn with_size_verification(mut self, verify: bool) -> Self {
        self.verify_size = verify;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<I>> {
        // Each operation leaves the index consistent before it can panic
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adopt a staging file under `key`
    ///
    /// Any existing entry for `key` is removed first, even when the new file
    /// is then rejected. On success the staging file has been moved into the
    /// cache directory and belongs to the cache. On error (or `TooLarge`) the
    /// staging file is left where it was.
    ///
    /// # Arguments
    /// * `key` - Logical key for the artifact
    /// * `staging_path` - File produced by the downloader
    /// * `size` - Size in bytes, as reported by the caller
    /// * `caching_info` - Validators returned verbatim by `info`
    pub fn add(
        &self,
        key: &str,
        staging_path: &Path,
        size: u64,
        caching_info: I,
    ) -> Result<AddOutcome, CacheError> {
        let mut state = self.lock();

        if state.remove_entry(key).is_some() {
            debug!(key = %key, "Removed previous entry before adoption");
        }

        if size > self.max_size {
            debug!(
                key = %key,
                size = size,
                max_size = self.max_size,
                "File larger than cache, not caching"
            );
            return Ok(AddOutcome::TooLarge);
        }

        let file_name = staging_path
            .file_name()
            .ok_or_else(|| CacheError::InvalidStagingPath(staging_path.to_path_buf()))?;

        if self.verify_size {
            let actual = fs::metadata(staging_path)?.len();
            if actual != size {
                return Err(CacheError::SizeMismatch {
                    path: staging_path.to_path_buf(),
                    expected: size,
                    actual,
                });
            }
        }

        state.make_room(size, self.max_size);

        let local_path = state.destination_for(&self.cache_dir, file_name);
        fs::rename(staging_path, &local_path).map_err(|source| CacheError::Relocate {
            from: staging_path.to_path_buf(),
            to: local_path.clone(),
            source,
        })?;

        let access_seq = state.tick();
        state.file_paths.insert(local_path.clone(), key.to_string());
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                local_path: local_path.clone(),
                size,
                last_accessed: Instant::now(),
                access_seq,
                caching_info,
            },
        );
        state.used_bytes += size;

        debug!(
            key = %key,
            local = %local_path.display(),
            size = size,
            used_bytes = state.used_bytes,
            "Stored file in cache"
        );

        Ok(AddOutcome::Cached { path: local_path })
    }

    /// Physical path of a tracked key
    ///
    /// Does not count as an access; call `record_access` after reading.
    pub fn path_for_key(&self, key: &str) -> Option<PathBuf> {
        self.lock()
            .entries
            .get(key)
            .map(|entry| entry.local_path.clone())
    }

    /// Mark a tracked key as most recently used
    pub fn record_access(&self, key: &str) {
        let mut state = self.lock();
        let access_seq = state.tick();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_accessed = Instant::now();
            entry.access_seq = access_seq;
        }
    }

    /// Remove a key and delete its backing file
    ///
    /// Returns whether the key was tracked.
    pub fn remove_entry(&self, key: &str) -> bool {
        let removed = self.lock().remove_entry(key).is_some();
        if removed {
            debug!(key = %key, "Invalidated cached file");
        }
        removed
    }

    /// Delete `path` unless it backs a tracked entry
    ///
    /// Returns `Ok(true)` when something was deleted. Tracked paths and paths
    /// that no longer exist yield `Ok(false)`.
    pub fn remove_file_if_untracked(&self, path: &Path) -> Result<bool, CacheError> {
        let state = self.lock();
        if state.file_paths.contains_key(path)
            || state.file_paths.contains_key(&resolve_parent(path))
        {
            return Ok(false);
        }

        let removed = remove_path(path).map_err(|source| CacheError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        if removed {
            debug!(path = %path.display(), "Removed untracked file");
        }
        Ok(removed)
    }

    /// Caching info stored for a tracked key
    pub fn info(&self, key: &str) -> Option<I> {
        self.lock()
            .entries
            .get(key)
            .map(|entry| entry.caching_info.clone())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            used_bytes: state.used_bytes,
            max_bytes: self.max_size,
            evictions: state.evictions,
            failed_removals: state.failed_removals,
        }
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Canonicalize the parent of `path`, keeping the final component as is
///
/// Lets a relative or symlinked spelling of a tracked file match its index
/// key without following a symlink at the final component.
fn resolve_parent(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name() else {
        return path.to_path_buf();
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match fs::canonicalize(parent) {
        Ok(parent) => parent.join(file_name),
        Err(_) => path.to_path_buf(),
    }
}

/// Remove a file or directory tree; a missing path is not an error
fn remove_path(path: &Path) -> io::Result<bool> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
