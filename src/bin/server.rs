//! Serves the canonical file tree behind the AFS-style cache wire protocol.

use afs_cache::net::listener;
use afs_cache::server::Server;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Startup configuration: `(port, root)`. Flags override the same fields
/// loaded from `--config`; the file in turn overrides nothing, since
/// neither field has a built-in default.
#[derive(Parser, Debug)]
#[command(about = "AFS-style cache server")]
struct Args {
    /// Optional TOML config file providing defaults for unset flags.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let file: FileConfig = match &args.config {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => FileConfig::default(),
    };

    let port = afs_cache::config::layer(args.port, file.port).ok_or("missing required config: port")?;
    let root = afs_cache::config::layer(args.root, file.root).ok_or("missing required config: root")?;

    let server = Arc::new(Server::open(root.clone())?);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, root = %root.display(), "server listening");

    listener::serve(listener, server).await?;
    Ok(())
}
