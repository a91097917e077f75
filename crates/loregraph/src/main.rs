//! Loregraph daemon - serves the memory graph over HTTP

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use loregraph_server::MemoryGraph;
use loregraph_server::api::ApiServer;
use loregraph_server::config::Config;
use loregraph_server::error::Result;
use loregraph_server::storage::{Checkpointer, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

/// Loregraph - versioned long-term memory for AI agents
#[derive(Parser)]
#[command(name = "loregraph")]
#[command(about = "A versioned knowledge-graph memory store with human review")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the API server (default command)
    #[command(name = "serve")]
    Serve {
        /// Override the listen address
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => serve(cli.config, None).await,
        Some(Command::Serve { listen }) => serve(cli.config, listen).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,loregraph=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_store(config: &Config) -> Arc<dyn SnapshotStore> {
    if config.storage.persist {
        Arc::new(FileSnapshotStore::new(config.storage.checkpoint_path()))
    } else {
        tracing::warn!("Persistence disabled, graph lives in memory only");
        Arc::new(MemorySnapshotStore::new())
    }
}

async fn serve(config_path: Option<PathBuf>, listen: Option<String>) -> Result<()> {
    tracing::info!("Starting Loregraph daemon");

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }
    tracing::debug!("Config loaded: {:?}", config);

    let store = open_store(&config);
    tracing::info!("Loading graph from: {}", store.describe());
    let graph = match store.load().await? {
        Some(image) => {
            let graph = MemoryGraph::from_image(image, &config)?;
            tracing::info!(entities = graph.store().entity_count(), "Graph restored");
            graph
        }
        None => {
            tracing::info!("No checkpoint found, starting with an empty graph");
            MemoryGraph::new(&config)
        }
    };
    let graph = Arc::new(graph);

    let checkpointer = Arc::new(Checkpointer::new(graph.clone(), store));
    let interval = Duration::from_secs(config.storage.checkpoint_interval_secs.max(1));
    let ticker = checkpointer.clone().spawn(interval);

    let server = ApiServer::new(config.server.clone(), graph);
    let served = server.serve().await;

    ticker.abort();
    tracing::info!("Writing final checkpoint");
    checkpointer.checkpoint().await?;
    served?;

    tracing::info!("Loregraph daemon stopped");
    Ok(())
}
