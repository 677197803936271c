//! sourcing-migrate CLI - legacy e-sourcing data migration runner.

use clap::{Parser, Subcommand};
use sourcing_migrate::transform::ModeOverride;
use sourcing_migrate::{
    health_check, migrations, report, Config, MigrateError, Migration, Runner, TransactionMode,
    WriteMode,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sourcing-migrate")]
#[command(about = "Bulk ETL from the legacy e-sourcing schema to PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered migrations
    List,

    /// Run one migration, or every registered one in order
    Run {
        /// Migration name as shown by `list`
        migration: Option<String>,

        /// Run every registered migration in registry order
        #[arg(long, conflicts_with = "migration")]
        all: bool,

        /// Force per-statement commits instead of one run-wide transaction
        #[arg(long)]
        autocommit: bool,

        /// Override the report artifact directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Test both database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbosity: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);

    match cli.command {
        Commands::List => {
            for m in migrations::all() {
                let mode = match m.transaction_mode() {
                    TransactionMode::Transactional => "transactional",
                    TransactionMode::Autocommit => "autocommit",
                };
                let write = match m.write_mode() {
                    WriteMode::Upsert => "upsert",
                    WriteMode::BulkCopy => "bulk-copy",
                };
                println!(
                    "{:<28} -> {:<28} [{}, {}, batch {}]",
                    m.name(),
                    m.target_table(),
                    mode,
                    write,
                    m.batch_size()
                );
            }
            Ok(())
        }

        Commands::Run {
            migration,
            all,
            autocommit,
            report_dir,
        } => {
            let config = Config::load(&cli.config)?;
            let report_dir = report_dir.unwrap_or_else(|| config.migration.report_dir());
            let runner = Runner::new(config);

            let selected: Vec<Box<dyn Migration>> = if all {
                migrations::all()
            } else {
                let name = migration.ok_or_else(|| {
                    MigrateError::Config("specify a migration name or --all".into())
                })?;
                vec![migrations::find(&name)?]
            };

            let mut failed: Vec<String> = Vec::new();
            for m in selected {
                let m: Box<dyn Migration> = if autocommit {
                    Box::new(ModeOverride::new(m, TransactionMode::Autocommit))
                } else {
                    m
                };

                match runner.run(m.as_ref()).await {
                    Ok(run_report) => {
                        report::write_report(&report_dir, &run_report)?;
                    }
                    Err(e) => {
                        error!("{}", e.format_detailed());
                        failed.push(m.name().to_string());
                        if !all {
                            return Err(e);
                        }
                    }
                }
            }

            if failed.is_empty() {
                Ok(())
            } else {
                Err(MigrateError::run(
                    "run --all",
                    format!("{} migration(s) failed: {}", failed.len(), failed.join(", ")),
                ))
            }
        }

        Commands::HealthCheck => {
            let config = Config::load(&cli.config)?;
            health_check(&config).await?;
            info!("Health check passed");
            Ok(())
        }
    }
}
