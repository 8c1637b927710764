//! Artifact Cache Daemon - disk-backed LRU cache for downloaded artifacts
//!
//! Serves the cache to downloader processes over a Unix socket.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use artifact_cache::cache::{sweep_orphans, FileCache};
use artifact_cache::config::{parse_size, CacheConfig};
use artifact_cache::ipc::{client, Command as IpcCommand, IpcServer, Response};

/// CLI command
#[derive(Debug, PartialEq)]
enum Command {
    /// Run the cache daemon (default)
    Serve,
    /// Ask a running daemon to sweep orphaned files
    Sweep,
    /// Print cache usage from a running daemon
    Status,
    /// Show help
    Help,
}

/// Flags that override the loaded configuration
#[derive(Debug, Default, PartialEq)]
struct Overrides {
    config_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    max_size: Option<u64>,
    socket_path: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut CacheConfig) {
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(size) = self.max_size {
            config.max_size = size;
        }
        if let Some(socket) = &self.socket_path {
            config.socket_path = socket.clone();
        }
    }
}

fn print_help() {
    eprintln!(
        r#"Artifact Cache Daemon - LRU disk cache for downloaded artifacts

USAGE:
    artifact-cache-daemon [serve] [OPTIONS]   # Run the daemon (default)
    artifact-cache-daemon sweep [OPTIONS]     # Sweep orphaned files now
    artifact-cache-daemon status [OPTIONS]    # Show cache usage
    artifact-cache-daemon help

OPTIONS:
    --config <path>     JSON config file
    --dir <path>        Cache directory
    --max-size <size>   Byte budget (accepts K, M, G suffixes)
    --socket <path>     Unix socket path

ENVIRONMENT:
    ARTIFACT_CACHE_DIR          Cache directory
    ARTIFACT_CACHE_MAX_SIZE     Byte budget
    ARTIFACT_CACHE_VERIFY_SIZE  Check staged file sizes on add (true/false)
    ARTIFACT_CACHE_SOCKET       Unix socket path
    ARTIFACT_CACHE_SWEEP_SECS   Seconds between orphan sweeps
    RUST_LOG                    Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_args(args: &[String]) -> Result<(Command, Overrides)> {
    let mut command = None;
    let mut overrides = Overrides::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {}", flag))
        };

        match arg.as_str() {
            "--config" => overrides.config_path = Some(PathBuf::from(value(arg)?)),
            "--dir" => overrides.cache_dir = Some(PathBuf::from(value(arg)?)),
            "--socket" => overrides.socket_path = Some(PathBuf::from(value(arg)?)),
            "--max-size" => {
                let raw = value(arg)?;
                overrides.max_size = Some(parse_size(&raw).context("Invalid --max-size")?);
            }
            "help" | "--help" | "-h" => command = Some(Command::Help),
            "serve" | "sweep" | "status" if command.is_none() => {
                command = Some(match arg.as_str() {
                    "serve" => Command::Serve,
                    "sweep" => Command::Sweep,
                    _ => Command::Status,
                });
            }
            other => return Err(anyhow!("Unknown argument: {}", other)),
        }
    }

    Ok((command.unwrap_or(Command::Serve), overrides))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let (command, overrides) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if command == Command::Help {
        print_help();
        return Ok(());
    }

    let mut config = CacheConfig::load(overrides.config_path.as_deref())?;
    overrides.apply(&mut config);

    match command {
        Command::Serve => serve(config).await,
        Command::Sweep => {
            match client::request(&config.socket_path, &IpcCommand::Sweep).await? {
                Response::Swept {
                    removed,
                    retained,
                    failed,
                } => {
                    println!(
                        "Removed {} orphaned paths ({} retained, {} failed)",
                        removed, retained, failed
                    );
                    Ok(())
                }
                other => Err(anyhow!("Unexpected response: {:?}", other)),
            }
        }
        Command::Status => {
            match client::request(&config.socket_path, &IpcCommand::GetStatus).await? {
                Response::Status {
                    entries,
                    used_bytes,
                    max_bytes,
                    evictions,
                    failed_removals,
                    ..
                } => {
                    println!("Entries:          {}", entries);
                    println!("Used:             {} / {} bytes", used_bytes, max_bytes);
                    println!("Evictions:        {}", evictions);
                    println!("Failed removals:  {}", failed_removals);
                    Ok(())
                }
                other => Err(anyhow!("Unexpected response: {:?}", other)),
            }
        }
        Command::Help => Ok(()),
    }
}

/// Run the daemon until Ctrl+C
async fn serve(config: CacheConfig) -> Result<()> {
    info!("Starting artifact cache daemon");

    let cache: Arc<FileCache> = Arc::new(FileCache::from_config(&config)?);

    // The index starts empty, so anything left in the directory is an orphan
    run_sweep(Arc::clone(&cache)).await;

    let mut ipc_server = IpcServer::new(Arc::clone(&cache), config.socket_path.clone());
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    let running = Arc::clone(&ipc_server);
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = running.run().await {
            error!(error = %e, "IPC server error");
        }
    });

    let sweep_handle = tokio::spawn(sweep_periodically(
        Arc::clone(&cache),
        config.sweep_interval,
    ));

    info!("Daemon ready. Waiting for downloader commands...");

    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, stopping...");
    sweep_handle.abort();
    ipc_handle.abort();
    ipc_server.stop()?;

    info!("Shutdown complete.");
    Ok(())
}

async fn sweep_periodically(cache: Arc<FileCache>, period: Duration) {
    if period.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        interval.tick().await;
        run_sweep(Arc::clone(&cache)).await;
    }
}

async fn run_sweep(cache: Arc<FileCache>) {
    match tokio::task::spawn_blocking(move || sweep_orphans(&cache)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Cache sweep failed"),
        Err(e) => warn!(error = %e, "Cache sweep task failed"),
    }
}
