//! Wharf builder daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wharf_core::config::WharfConfig;
use wharf_core::error::Result;
use wharf_core::queue::{DurableQueue, MemoryJobStore, QueueOptions};

use wharf_builder::records::{MemoryUserStore, MemoryVersionStore};
use wharf_builder::registry::{RegistryClient, TokenIssuer};
use wharf_builder::{FsObjectStore, PipelineDeps, UploadProcessor};

#[derive(Parser, Debug)]
#[command(name = "wharf-builder", version, about = "Model image build worker")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of worker loops
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => WharfConfig::from_file(path)?,
        None => WharfConfig::default(),
    };

    // Initialize tracing
    let default_level: tracing::Level = config.log_level.into();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
        )
        .with_target(false)
        .init();

    let issuer = Arc::new(TokenIssuer::from_files(
        &config.keys.private_key,
        &config.keys.public_key,
        &config.registry,
    )?);
    let registry = Arc::new(RegistryClient::new(&config.registry, issuer)?);
    let storage = Arc::new(FsObjectStore::new(&config.storage.root)?);

    // Process-local stores: queued jobs and model records do not
    // survive a restart and are invisible to the surrounding
    // application. A durable deployment implements JobStore,
    // UserStore and VersionStore over the application's database and
    // wires those here instead.
    let queue = Arc::new(DurableQueue::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryJobStore::new()),
        QueueOptions {
            visibility: Duration::from_secs(config.queue.visibility_secs),
            max_retries: config.queue.max_retries,
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
        },
    ));

    let users = Arc::new(MemoryUserStore::new());
    let versions = Arc::new(MemoryVersionStore::new());

    let deps = PipelineDeps { storage, registry };
    let workers = cli.workers.unwrap_or(config.queue.workers).max(1);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::with_capacity(workers);
    for n in 0..workers {
        let processor = UploadProcessor::new(
            Arc::clone(&queue),
            users.clone(),
            versions.clone(),
            deps.clone(),
            config.clone(),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            tracing::info!(worker = n, "Worker started");
            if let Err(e) = processor.run(shutdown).await {
                tracing::error!(worker = n, error = %e, "Worker exited with error");
            }
        }));
    }
    tracing::info!(workers, "Builder running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
