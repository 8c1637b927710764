//! IPC protocol definitions for downloader-cache communication
//!
//! This module defines the newline-delimited JSON protocol spoken between
//! downloader processes and the cache daemon over a Unix domain socket.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, CachingInfo, SweepStats};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from a downloader to the cache daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Adopt a staging file under a key
    #[serde(rename_all = "camelCase")]
    Add {
        /// Logical key
        key: String,
        /// Staging file to move into the cache
        staging_path: String,
        /// Size in bytes reported by the downloader
        size: u64,
        /// Validators to store with the entry
        #[serde(default)]
        caching_info: CachingInfo,
    },
    /// Resolve a key to its cached file
    PathForKey { key: String },
    /// Mark a key as recently used
    RecordAccess { key: String },
    /// Drop a key and its file
    RemoveEntry { key: String },
    /// Delete a path unless an entry owns it
    RemoveFileIfUntracked { path: String },
    /// Fetch stored validators for a key
    Info { key: String },
    /// Run an orphan sweep now
    Sweep,
    /// Get daemon status and cache usage
    GetStatus,
}

/// Responses sent from the cache daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Success response
    #[serde(rename_all = "camelCase")]
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error {
        /// Error message
        error: String,
    },
    /// Result of an `add`
    #[serde(rename_all = "camelCase")]
    Added {
        /// False when the file is larger than the whole cache
        accepted: bool,
        /// Cached file path when accepted
        path: Option<String>,
    },
    /// Result of a `pathForKey`
    Path { path: Option<String> },
    /// Result of an `info`
    #[serde(rename_all = "camelCase")]
    Info { caching_info: Option<CachingInfo> },
    /// Result of a `sweep`
    Swept {
        removed: usize,
        retained: usize,
        failed: usize,
    },
    /// Status response with cache usage
    #[serde(rename_all = "camelCase")]
    Status {
        /// Protocol version
        version: u32,
        /// Whether daemon is healthy
        healthy: bool,
        entries: usize,
        used_bytes: u64,
        max_bytes: u64,
        evictions: u64,
        failed_removals: u64,
    },
}

impl Response {
    pub fn status(stats: CacheStats) -> Self {
        Response::Status {
            version: PROTOCOL_VERSION,
            healthy: true,
            entries: stats.entries,
            used_bytes: stats.used_bytes,
            max_bytes: stats.max_bytes,
            evictions: stats.evictions,
            failed_removals: stats.failed_removals,
        }
    }

    pub fn swept(stats: SweepStats) -> Self {
        Response::Swept {
            removed: stats.removed,
            retained: stats.retained,
            failed: stats.failed,
        }
    }
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_command() {
        let json = r#"{"type":"add","key":"droplet-123","stagingPath":"/tmp/dl/abc","size":42,"cachingInfo":{"etag":"\"e1\""}}"#;
        let cmd = parse_command(json.as_bytes()).unwrap();
        match cmd {
            Command::Add {
                key,
                staging_path,
                size,
                caching_info,
            } => {
                assert_eq!(key, "droplet-123");
                assert_eq!(staging_path, "/tmp/dl/abc");
                assert_eq!(size, 42);
                assert_eq!(caching_info.etag.as_deref(), Some("\"e1\""));
                assert_eq!(caching_info.last_modified, None);
            }
            _ => panic!("Expected Add command"),
        }
    }

    #[test]
    fn test_parse_add_without_caching_info() {
        let json = r#"{"type":"add","key":"k","stagingPath":"/tmp/dl/abc","size":1}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::Add { caching_info, .. } => assert!(caching_info.is_empty()),
            _ => panic!("Expected Add command"),
        }
    }

    #[test]
    fn test_parse_key_commands() {
        let cmd = parse_command(br#"{"type":"pathForKey","key":"k"}"#).unwrap();
        assert!(matches!(cmd, Command::PathForKey { key } if key == "k"));

        let cmd = parse_command(br#"{"type":"removeFileIfUntracked","path":"/c/x"}"#).unwrap();
        assert!(matches!(cmd, Command::RemoveFileIfUntracked { path } if path == "/c/x"));

        let cmd = parse_command(br#"{"type":"getStatus"}"#).unwrap();
        assert!(matches!(cmd, Command::GetStatus));
    }

    #[test]
    fn test_parse_unknown_command_fails() {
        assert!(parse_command(br#"{"type":"explode"}"#).is_err());
        assert!(parse_command(br#"{"type":"add","key":"k"}"#).is_err());
    }

    #[test]
    fn test_serialize_added_response() {
        let response = Response::Added {
            accepted: false,
            path: None,
        };
        let json = serialize_response(&response).unwrap();
        let json_str = String::from_utf8(json).unwrap();
        assert!(json_str.ends_with('\n'));
        assert!(json_str.contains(r#""type":"added""#));
        assert!(json_str.contains(r#""accepted":false"#));
    }

    #[test]
    fn test_serialize_status_response() {
        let response = Response::status(CacheStats {
            entries: 2,
            used_bytes: 30,
            max_bytes: 100,
            evictions: 1,
            failed_removals: 0,
        });
        let json = serialize_response(&response).unwrap();
        let json_str = String::from_utf8(json).unwrap();
        assert!(json_str.contains(r#""type":"status""#));
        assert!(json_str.contains(r#""usedBytes":30"#));
        assert!(json_str.contains(r#""failedRemovals":0"#));
    }
}
