//! File Cache Error Types
//!
//! Structured errors for cache adoption and removal.
//! Capacity rejection is not an error; see `AddOutcome::TooLarge`.

use std::io;
use std::path::PathBuf;

/// Cache operation error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to move {from:?} into cache at {to:?}: {source}")]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Staging file {path:?} is {actual} bytes, caller reported {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Staging path has no file name: {0:?}")]
    InvalidStagingPath(PathBuf),

    #[error("Failed to remove {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocate_message_names_both_paths() {
        let err = CacheError::Relocate {
            from: PathBuf::from("/staging/blob"),
            to: PathBuf::from("/cache/blob"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/staging/blob"));
        assert!(msg.contains("/cache/blob"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = CacheError::SizeMismatch {
            path: PathBuf::from("/staging/blob"),
            expected: 10,
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "Staging file \"/staging/blob\" is 9 bytes, caller reported 10"
        );
    }
}
