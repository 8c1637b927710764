//! Caching validators stored alongside each cached artifact.

use serde::{Deserialize, Serialize};

/// Conditional-request validators recorded by the downloader
///
/// The cache never interprets these; it hands them back verbatim so the
/// downloader can decide whether a cached copy is still fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachingInfo {
    /// Entity tag from the last successful fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Last-Modified header from the last successful fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl CachingInfo {
    pub fn new(etag: impl Into<String>, last_modified: impl Into<String>) -> Self {
        Self {
            etag: Some(etag.into()),
            last_modified: Some(last_modified.into()),
        }
    }

    /// True when no validator is set
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}
