//! Daemon configuration
//!
//! Loaded from defaults, then an optional JSON file, then `ARTIFACT_CACHE_*`
//! environment variables. Command-line flags are applied last by `main`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default maximum cache size: 1 GB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default socket path for IPC communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/artifact-cache.sock";

/// Default interval between orphan sweeps: 10 minutes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Cache and daemon settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Directory holding adopted files
    pub cache_dir: PathBuf,
    /// Total byte budget
    pub max_size: u64,
    /// Check staging file length against the reported size
    pub verify_size: bool,
    /// Unix socket the IPC server listens on
    pub socket_path: PathBuf,
    /// Time between orphan sweeps
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("artifact-cache");

        Self {
            cache_dir,
            max_size: DEFAULT_MAX_CACHE_SIZE,
            verify_size: false,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Load configuration from an optional file plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(&env)?;
        Ok(config)
    }

    /// Parse a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Override fields from `ARTIFACT_CACHE_*` variables
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = env.get("ARTIFACT_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(size) = env.get("ARTIFACT_CACHE_MAX_SIZE") {
            self.max_size = parse_size(size)
                .context("Invalid ARTIFACT_CACHE_MAX_SIZE")?;
        }
        if let Some(verify) = env.get("ARTIFACT_CACHE_VERIFY_SIZE") {
            self.verify_size = parse_bool(verify)
                .context("Invalid ARTIFACT_CACHE_VERIFY_SIZE")?;
        }
        if let Some(socket) = env.get("ARTIFACT_CACHE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(secs) = env.get("ARTIFACT_CACHE_SWEEP_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid ARTIFACT_CACHE_SWEEP_SECS: {:?}", secs))?;
            self.sweep_interval = Duration::from_secs(secs);
        }
        Ok(())
    }
}

/// Parse a byte count, accepting `K`/`M`/`G` suffixes (powers of 1024)
pub fn parse_size(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, 'K' | 'k')) => (&trimmed[..idx], 1024),
        Some((idx, 'M' | 'm')) => (&trimmed[..idx], 1024 * 1024),
        Some((idx, 'G' | 'g')) => (&trimmed[..idx], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };

    let base: u64 = digits
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid size {:?}: {}", value, e))?;
    base.checked_mul(multiplier)
        .ok_or_else(|| anyhow!("size {:?} overflows", value))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got {:?}", other)),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
