use bulletin_ingest::Result;
use bulletin_ingest::commands::{ensure_schema, run_ingest, search, show_config};
use bulletin_ingest::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bulletin-ingest")]
#[command(about = "Incremental ingestion and semantic retrieval for intranet bulletins")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml; defaults to the user config dir.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass for a date
    Run {
        /// Target date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Ask the stored corpus: embed a query and rank nearest articles
    Search {
        /// Query text
        query: String,
        /// Number of results to return
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
    /// Create or verify the database schema
    Schema,
    /// Show the resolved configuration (credentials masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config_dir {
        Some(dir) => Config::load(dir)?,
        None => Config::load_default()?,
    };

    match cli.command {
        Commands::Run { date } => {
            run_ingest(config, date).await?;
        }
        Commands::Search { query, top_k } => {
            search(config, query, top_k).await?;
        }
        Commands::Schema => {
            ensure_schema(config).await?;
        }
        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}
