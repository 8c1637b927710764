//! Minimal client for talking to a running cache daemon

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::ipc::protocol::{Command, Response};

/// Send one command and wait for its response
pub async fn request(socket_path: &Path, command: &Command) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to cache daemon at {:?}", socket_path))?;
    let (reader, mut writer) = stream.into_split();

    let mut json = serde_json::to_vec(command).context("Failed to serialize command")?;
    json.push(b'\n');
    writer
        .write_all(&json)
        .await
        .context("Failed to send command")?;

    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .await
        .context("Failed to read response")?;
    if read == 0 {
        return Err(anyhow!("Cache daemon closed the connection without responding"));
    }

    serde_json::from_str(line.trim()).context("Failed to parse response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::ipc::IpcServer;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_request_sweep_and_status() {
        let root = TempDir::new().unwrap();
        let cache: Arc<FileCache> =
            Arc::new(FileCache::with_config(root.path().join("cache"), 100).unwrap());
        std::fs::write(cache.cache_dir().join("orphan"), b"stale").unwrap();
        let socket_path = root.path().join("cache.sock");

        let mut server = IpcServer::new(Arc::clone(&cache), socket_path.clone());
        server.start().await.unwrap();
        let handle = tokio::spawn(async move { server.run().await });

        let response = request(&socket_path, &Command::Sweep).await.unwrap();
        assert_eq!(
            response,
            Response::Swept {
                removed: 1,
                retained: 0,
                failed: 0
            }
        );

        let response = request(&socket_path, &Command::GetStatus).await.unwrap();
        assert!(matches!(response, Response::Status { entries: 0, max_bytes: 100, .. }));

        handle.abort();
    }

    #[tokio::test]
    async fn test_request_without_daemon_fails() {
        let root = TempDir::new().unwrap();
        let result = request(&root.path().join("absent.sock"), &Command::GetStatus).await;
        assert!(result.is_err());
    }
}
