//! Clustering server over a directory of CSV tables.
//!
//! ```bash
//! kmeans-server --config kmeans-server.toml
//! kmeans-server --data-dir ./data --models-dir ./models --port 8080
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use kmeans_server::{CsvSource, KMeansServer, ServerConfig};

#[derive(Parser)]
#[command(name = "kmeans-server", version, about = "K-means clustering server")]
struct Cli {
    /// TOML configuration file (defaults to ./kmeans-server.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root of the CSV tables: <data-dir>/<database>/<table>.csv
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory the .dat models are written to and read from
    #[arg(long)]
    models_dir: Option<PathBuf>,
}

fn apply_overrides(config: &mut ServerConfig, cli: Cli) {
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(models_dir) = cli.models_dir {
        config.storage.models_dir = models_dir;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    apply_overrides(&mut config, cli);
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        data_dir = %config.storage.data_dir.display(),
        models_dir = %config.storage.models_dir.display(),
        users = config.users.len(),
        "starting kmeans server"
    );

    let source = CsvSource::new(&config.storage.data_dir).with_policy(config.access_policy());
    let address = config.listen_address();
    let server = KMeansServer::bind(address.as_str(), Arc::new(source), Arc::new(config))
        .with_context(|| format!("failed to bind {}", address))?;

    server.run()?;
    Ok(())
}
