//! Cloudport command-line client.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Resumable uploads and queued downloads against a Cloudport store
#[derive(Parser)]
#[command(name = "cloudport")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload files, one after another
    Put {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote folder to upload into
        #[arg(short, long, default_value = "/")]
        parent: String,
    },

    /// Download files or folders by remote path
    Get {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Output directory (defaults to `download_dir` from the config)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List a remote folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    }
    .with_env_overrides(|key| std::env::var(key).ok());
    tracing::debug!(api = %config.api_base_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Command::Put { files, parent } => commands::put(&config, &files, &parent).await,
            Command::Get { paths, out } => {
                let out = out.unwrap_or_else(|| config.download_dir.clone());
                commands::get(&config, &paths, &out).await
            }
            Command::Ls { path } => commands::ls(&config, &path).await,
        }
    })
}
