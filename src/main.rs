use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use shelter_etl::config::{Config, StoreBackend};
use shelter_etl::logging;
use shelter_etl::{
    CsvRecordSource, InMemoryStore, NormalizedStore, Pipeline, SqliteStore, StoreSummary,
};

#[derive(Parser)]
#[command(name = "shelter_etl")]
#[command(about = "Normalize animal shelter intake and outcome exports")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (TOML). Defaults to ./shelter.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the normalized model from the CSV exports
    Run {
        /// Intake export
        #[arg(long)]
        intakes: Option<PathBuf>,
        /// Outcome export
        #[arg(long)]
        outcomes: Option<PathBuf>,
        /// SQLite database to rebuild
        #[arg(long)]
        db: Option<PathBuf>,
        /// Store backend
        #[arg(long, value_enum)]
        backend: Option<StoreBackend>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a summary of an existing database
    Summary {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Number of breeds to list
        #[arg(long, default_value_t = 5)]
        top: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print the content fingerprint of an existing database
    Fingerprint {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn open_existing(path: &Path) -> anyhow::Result<SqliteStore> {
    if !path.exists() {
        bail!("database '{}' does not exist; run `shelter_etl run` first", path.display());
    }
    SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path, true)?,
        None => Config::load()?,
    };
    let _guard = logging::init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            intakes,
            outcomes,
            db,
            backend,
            json,
        } => {
            if let Some(p) = intakes {
                config.input.intakes_csv = p;
            }
            if let Some(p) = outcomes {
                config.input.outcomes_csv = p;
            }
            if let Some(p) = db {
                config.store.path = p;
            }
            if let Some(b) = backend {
                config.store.backend = b;
            }

            let store: Arc<dyn NormalizedStore> = match config.store.backend {
                StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.store.path)?),
                StoreBackend::Memory => Arc::new(InMemoryStore::new()),
            };
            let source =
                CsvRecordSource::new(&config.input.intakes_csv, &config.input.outcomes_csv);
            let pipeline = Pipeline::new(store.clone());

            let report = match pipeline.run(&source).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Normalization run failed: {}", e);
                    return Err(e.into());
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("📊 Run {} ({} store)", report.run_id, report.backend);
                println!("   Raw intakes: {}", report.raw_intakes);
                println!("   Raw outcomes: {}", report.raw_outcomes);
                println!("   Animals: {}", report.entities);
                println!(
                    "   Dimensions: {} types, {} breeds, {} colors",
                    report.animal_types, report.breeds, report.colors
                );
                println!(
                    "   Intake episodes: {} ({} dropped)",
                    report.intake_episodes, report.dropped_intakes
                );
                println!(
                    "   Outcome episodes: {} ({} matched, {} unmatched, {} dropped)",
                    report.outcome_episodes,
                    report.correlation.matched,
                    report.correlation.unmatched,
                    report.correlation.dropped_outcomes
                );
                println!("   Fingerprint: {}", report.fingerprint);
                if config.store.backend == StoreBackend::Memory {
                    println!("\n{}", StoreSummary::collect(store.as_ref(), 5).await?);
                }
            }
        }
        Commands::Summary { db, top, json } => {
            let path = db.unwrap_or(config.store.path);
            let store = open_existing(&path)?;
            let summary = StoreSummary::collect(&store, top).await?;
            info!("Summarized {}", path.display());
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary);
            }
        }
        Commands::Fingerprint { db } => {
            let path = db.unwrap_or(config.store.path);
            let store = open_existing(&path)?;
            println!("{}", store.snapshot().await?.fingerprint()?);
        }
    }
    Ok(())
}
