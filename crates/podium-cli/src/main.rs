use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use podium_store::{default_games, IngestStore, PgStore};
use podium_sync::{report_markdown, run_jobs_from_env, CancelFlag, IngestConfig};

#[derive(Debug, Parser)]
#[command(name = "podium")]
#[command(about = "Tournament ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every enabled job from jobs.yaml, or a single one.
    Ingest {
        #[arg(long)]
        job: Option<String>,
    },
    /// Apply database migrations.
    Migrate,
    /// Upsert the built-in game registry.
    SeedGames,
    /// Print a digest of recent run reports.
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest { job: None }) {
        Commands::Ingest { job } => {
            let cancel = CancelFlag::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("stop requested; finishing the in-flight candidate");
                    ctrl_c.cancel();
                }
            });

            let reports = run_jobs_from_env(&config, job.as_deref(), cancel).await?;
            let mut aborted = false;
            for report in &reports {
                println!(
                    "run {} job={} status={:?} accepted={} failed={} inserted={} updated={} unchanged={}",
                    report.run_id,
                    report.job_key,
                    report.status,
                    report.accepted,
                    report.failures.len(),
                    report.outcome.inserted(),
                    report.outcome.updated(),
                    report.outcome.unchanged(),
                );
                aborted |= report.is_aborted();
            }
            // Failed candidates are reported above but do not fail the
            // process; an aborted run does.
            if aborted {
                std::process::exit(1);
            }
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("database migrated");
        }
        Commands::SeedGames => {
            let store = PgStore::connect(&config.database_url).await?;
            let seeded = store.seed_games(&default_games()).await?;
            println!("seeded {seeded} game(s)");
        }
        Commands::Report { runs } => {
            let digest = report_markdown(runs, &config.workspace_root.join("reports"))?;
            println!("{digest}");
        }
    }

    Ok(())
}
