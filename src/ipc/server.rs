//! IPC Server - Unix socket server for downloader communication
//!
//! Handles incoming connections from downloader processes and dispatches
//! commands to the FileCache.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::cache::{sweep_orphans, AddOutcome, FileCache};
use crate::ipc::protocol::{parse_command, serialize_response, Command, Response};

/// IPC Server that listens for commands from downloaders
pub struct IpcServer {
    /// Cache the commands operate on
    cache: Arc<FileCache>,
    /// Socket path to bind
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(cache: Arc<FileCache>, socket_path: PathBuf) -> Self {
        Self {
            cache,
            socket_path,
            listener: None,
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", self.socket_path))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let cache = Arc::clone(&self.cache);

                    // Spawn a new task to handle this connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, cache).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, cache: Arc<FileCache>) -> Result<()> {
    debug!("New connection");

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => {
                        let cache = Arc::clone(&cache);
                        // Cache calls block on the lock and on rename/remove
                        tokio::task::spawn_blocking(move || process_command(command, &cache))
                            .await
                            .unwrap_or_else(|e| Response::Error {
                                error: format!("Command handler failed: {}", e),
                            })
                    }
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    debug!("Connection ended");
    Ok(())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Process a command and return a response
fn process_command(command: Command, cache: &FileCache) -> Response {
    match command {
        Command::Add {
            key,
            staging_path,
            size,
            caching_info,
        } => {
            info!(key = %key, staging = %staging_path, size = size, "Processing add command");

            match cache.add(&key, Path::new(&staging_path), size, caching_info) {
                Ok(AddOutcome::Cached { path }) => Response::Added {
                    accepted: true,
                    path: Some(path_string(&path)),
                },
                Ok(AddOutcome::TooLarge) => Response::Added {
                    accepted: false,
                    path: None,
                },
                Err(e) => Response::Error {
                    error: format!("Add failed: {}", e),
                },
            }
        }

        Command::PathForKey { key } => Response::Path {
            path: cache.path_for_key(&key).map(|p| path_string(&p)),
        },

        Command::RecordAccess { key } => {
            cache.record_access(&key);
            Response::Success { message: None }
        }

        Command::RemoveEntry { key } => {
            info!(key = %key, "Processing removeEntry command");
            let message = if cache.remove_entry(&key) {
                format!("Removed {}", key)
            } else {
                format!("{} was not cached", key)
            };
            Response::Success {
                message: Some(message),
            }
        }

        Command::RemoveFileIfUntracked { path } => {
            match cache.remove_file_if_untracked(Path::new(&path)) {
                Ok(true) => Response::Success {
                    message: Some(format!("Removed {}", path)),
                },
                Ok(false) => Response::Success { message: None },
                Err(e) => Response::Error {
                    error: format!("Remove failed: {}", e),
                },
            }
        }

        Command::Info { key } => Response::Info {
            caching_info: cache.info(&key),
        },

        Command::Sweep => {
            info!("Processing sweep command");
            match sweep_orphans(cache) {
                Ok(stats) => Response::swept(stats),
                Err(e) => Response::Error {
                    error: format!("Sweep failed: {:#}", e),
                },
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            Response::status(cache.stats())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachingInfo;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn cache_in(root: &TempDir, max_size: u64) -> Arc<FileCache> {
        Arc::new(FileCache::with_config(root.path().join("cache"), max_size).unwrap())
    }

    #[test]
    fn test_process_add_and_lookup() {
        let root = TempDir::new().unwrap();
        let cache = cache_in(&root, 100);
        let staged = root.path().join("blob");
        std::fs::write(&staged, b"0123456789").unwrap();

        let response = process_command(
            Command::Add {
                key: "k".to_string(),
                staging_path: path_string(&staged),
                size: 10,
                caching_info: CachingInfo::new("\"e\"", "yesterday"),
            },
            &cache,
        );
        let cached = match response {
            Response::Added {
                accepted: true,
                path: Some(path),
            } => path,
            other => panic!("Expected accepted add, got {:?}", other),
        };

        let response = process_command(
            Command::PathForKey {
                key: "k".to_string(),
            },
            &cache,
        );
        assert_eq!(
            response,
            Response::Path {
                path: Some(cached)
            }
        );

        let response = process_command(
            Command::Info {
                key: "k".to_string(),
            },
            &cache,
        );
        assert_eq!(
            response,
            Response::Info {
                caching_info: Some(CachingInfo::new("\"e\"", "yesterday"))
            }
        );
    }

    #[test]
    fn test_process_oversized_add() {
        let root = TempDir::new().unwrap();
        let cache = cache_in(&root, 5);
        let staged = root.path().join("blob");
        std::fs::write(&staged, b"0123456789").unwrap();

        let response = process_command(
            Command::Add {
                key: "k".to_string(),
                staging_path: path_string(&staged),
                size: 10,
                caching_info: CachingInfo::default(),
            },
            &cache,
        );
        assert_eq!(
            response,
            Response::Added {
                accepted: false,
                path: None
            }
        );
        assert!(staged.exists());
    }

    #[test]
    fn test_process_failed_add_reports_error() {
        let root = TempDir::new().unwrap();
        let cache = cache_in(&root, 100);

        let response = process_command(
            Command::Add {
                key: "k".to_string(),
                staging_path: path_string(&root.path().join("missing")),
                size: 10,
                caching_info: CachingInfo::default(),
            },
            &cache,
        );
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let root = TempDir::new().unwrap();
        let cache = cache_in(&root, 100);
        let socket_path = root.path().join("cache.sock");

        let mut server = IpcServer::new(Arc::clone(&cache), socket_path.clone());
        server.start().await.unwrap();
        let server = Arc::new(server);
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run().await });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains(r#""type":"error""#));

        writer
            .write_all(b"{\"type\":\"getStatus\"}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(response, Response::status(cache.stats()));

        writer
            .write_all(b"{\"type\":\"removeEntry\",\"key\":\"absent\"}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains(r#""type":"success""#));

        handle.abort();
        server.stop().unwrap();
        assert!(!socket_path.exists());
    }
}
