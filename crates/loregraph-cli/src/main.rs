use std::path::PathBuf;

use clap::{Parser, Subcommand};
use loregraph_cli::commands::{EdgeCommand, EntityCommand, OrphansCommand, ReviewCommand, StatsCommand};
use loregraph_cli::error::CliResult;
use loregraph_cli::graph_file::GraphFile;
use loregraph_cli::output::OutputFormat;
use loregraph_server::config::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loregraph-cli")]
#[command(about = "Loregraph CLI - Offline maintenance for a loregraph data directory")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Entity and state commands")]
    Entity(EntityCommand),

    #[clap(about = "Direct edge commands")]
    Edge(EdgeCommand),

    #[clap(about = "Find and delete orphaned states and entities")]
    Orphans(OrphansCommand),

    #[clap(about = "Review session commands")]
    Review(ReviewCommand),

    #[clap(about = "Show graph statistics")]
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let config = Config::load(cli.config.as_deref())?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.storage.data_dir.clone());

    let file = GraphFile::open(&data_dir, &config).await?;
    let graph = file.graph();

    match &cli.command {
        Command::Entity(cmd) => cmd.execute(graph, format).await?,
        Command::Edge(cmd) => cmd.execute(graph, format).await?,
        Command::Orphans(cmd) => cmd.execute(graph, format).await?,
        Command::Review(cmd) => cmd.execute(graph, format).await?,
        Command::Stats(cmd) => cmd.execute(graph, format).await?,
    }

    if file.save_if_changed().await? {
        tracing::info!("Checkpoint updated: {}", file.path().display());
    }

    Ok(())
}
