//! Brings up the client-facing cache engine against a running server.
//!
//! `read`/`write`/`lseek` dispatch on an already-open handle is an external
//! collaborator's job per the design doc and isn't implemented here. What
//! this binary does drive, end to end, is the `open`/`close` surface: a
//! minimal line-oriented front end reads commands from stdin, allocates and
//! frees descriptors through [`FdTable`], and routes them through the cache
//! engine, so the descriptor layer is not just wired up but actually live.

use afs_cache::error::CacheError;
use afs_cache::net::RpcClient;
use afs_cache::proxy::{CacheEngine, FdTable};
use afs_cache::wire::OpenMode;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(about = "Client-facing cache proxy for the AFS-style file service")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    server_host: Option<String>,

    #[arg(long)]
    server_port: Option<u16>,

    #[arg(long)]
    cache_root: Option<PathBuf>,

    #[arg(long)]
    cache_capacity_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_host: Option<String>,
    server_port: Option<u16>,
    cache_root: Option<PathBuf>,
    cache_capacity_bytes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let file: FileConfig = match &args.config {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => FileConfig::default(),
    };

    let server_host =
        afs_cache::config::layer(args.server_host, file.server_host).ok_or("missing required config: server_host")?;
    let server_port =
        afs_cache::config::layer(args.server_port, file.server_port).ok_or("missing required config: server_port")?;
    let cache_root =
        afs_cache::config::layer(args.cache_root, file.cache_root).ok_or("missing required config: cache_root")?;
    let cache_capacity_bytes = afs_cache::config::layer(args.cache_capacity_bytes, file.cache_capacity_bytes)
        .ok_or("missing required config: cache_capacity_bytes")?;

    let client = RpcClient::connect((server_host.as_str(), server_port)).await?;
    let engine = CacheEngine::new(client, cache_root, cache_capacity_bytes).await?;
    let fds = FdTable::new();

    tracing::info!(%server_host, server_port, cache_capacity_bytes, "cache engine ready");
    run_command_loop(&engine, &fds).await
}

/// Reads `open <mode> <path>` / `close <fd>` commands from stdin, one per
/// line, until EOF. Exists to give the fd layer a real driver rather than
/// leaving it constructed-but-unused.
async fn run_command_loop(
    engine: &CacheEngine<RpcClient>,
    fds: &FdTable,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("open") => {
                let mode = match parts.next() {
                    Some("read") => OpenMode::Read,
                    Some("write") => OpenMode::Write,
                    Some("create") => OpenMode::Create,
                    Some("create_new") => OpenMode::CreateNew,
                    _ => {
                        println!("err invalid mode");
                        continue;
                    }
                };
                let Some(path) = parts.next() else {
                    println!("err missing path");
                    continue;
                };
                match engine.open(path, mode).await {
                    Ok(handle) => {
                        let fd = fds.insert(handle);
                        tracing::debug!(fd, path, "opened");
                        println!("fd {fd}");
                    }
                    Err(err) => {
                        tracing::debug!(path, code = err.code(), "open failed");
                        println!("err {}", err.code());
                    }
                }
            }
            Some("close") => {
                let Some(fd) = parts.next().and_then(|s| s.parse::<i32>().ok()) else {
                    println!("err invalid fd");
                    continue;
                };
                match fds.remove(fd) {
                    Some(handle) => match engine.close(handle).await {
                        Ok(()) => {
                            tracing::debug!(fd, "closed");
                            println!("ok");
                        }
                        Err(err) => println!("err {}", err.code()),
                    },
                    None => println!("err {}", CacheError::BadDescriptor.code()),
                }
            }
            _ => println!("err unknown command"),
        }
    }
    Ok(())
}
