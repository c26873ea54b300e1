use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod frame;
mod metrics;
mod models;
mod output;
mod pipeline;
mod report;
mod reshape;
mod risk;
mod rules;
mod server;
mod sink;
mod snapshot;
mod source;

use config::Config;
use pipeline::Pipeline;
use sink::Sink;
use source::Source;

#[derive(Parser)]
#[command(name = "risk-rating")]
#[command(about = "Rule-based financial risk ratings for portfolio companies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample observations for two companies
    Seed,
    /// Import observations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run the rating pipeline once
    Run {
        /// Read observations from this CSV instead of Postgres
        #[arg(long)]
        input_csv: Option<PathBuf>,
        /// Write output tables as CSV files into this directory instead of Postgres
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report of the current snapshot
    Report {
        #[arg(long)]
        input_csv: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the health and process endpoints
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            let inserted = db::seed(&pool, &config.source_table).await?;
            println!("Inserted {inserted} seed observations.");
        }
        Commands::Import { csv } => {
            let pool = connect(&config).await?;
            let inserted = db::import_csv(&pool, &config.source_table, &csv).await?;
            println!("Inserted {inserted} observations from {}.", csv.display());
        }
        Commands::Run {
            input_csv,
            out_dir,
            limit,
        } => {
            let pool = match (&input_csv, &out_dir) {
                (Some(_), Some(_)) => None,
                _ => Some(connect(&config).await?),
            };
            let source = build_source(&config, input_csv, pool.as_ref())?;
            let sink = build_sink(out_dir, pool.as_ref())?;

            let pipeline = Pipeline::standard(&config);
            let (summary, output) = pipeline::run(&pipeline, &source, &sink).await?;

            println!(
                "Run {} read {} observations and scored {} rows across {} companies ({} unratable).",
                summary.run_id,
                summary.observations,
                summary.scored_rows,
                summary.companies,
                summary.unratable_companies
            );

            let rated = report::rank_by_rating(&output);
            if rated.is_empty() {
                println!("No rated companies.");
                return Ok(());
            }

            println!("Highest current risk ratings:");
            for (score, record, current) in rated.iter().take(limit) {
                println!(
                    "- {} ({}) rating {:.1}, {} flags: {}",
                    record.key.company_name,
                    record.key.time_period.format("%Y-%m-%d"),
                    score,
                    current.flagged_count,
                    current.flagged
                );
            }
        }
        Commands::Report { input_csv, out } => {
            let pool = match &input_csv {
                Some(_) => None,
                None => Some(connect(&config).await?),
            };
            let source = build_source(&config, input_csv, pool.as_ref())?;
            let pipeline = Pipeline::standard(&config);

            let observations = source.fetch().await?;
            let output = pipeline.compute(&observations)?;
            let report = report::build_report(&output, &pipeline.rules, chrono::Utc::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            let pool = connect(&config).await?;
            let source = build_source(&config, None, Some(&pool))?;
            let sink = build_sink(None, Some(&pool))?;
            let state = server::AppState::new(Pipeline::standard(&config), source, sink);
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            server::serve(Arc::new(state), &bind_addr).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn build_source(
    config: &Config,
    input_csv: Option<PathBuf>,
    pool: Option<&PgPool>,
) -> anyhow::Result<Source> {
    match (input_csv, pool) {
        (Some(path), _) => Ok(Source::Csv(path)),
        (None, Some(pool)) => Ok(Source::Postgres {
            pool: pool.clone(),
            table: config.source_table.clone(),
            timeout: config.source_timeout,
        }),
        (None, None) => anyhow::bail!("no observation source: pass --input-csv or set DATABASE_URL"),
    }
}

fn build_sink(out_dir: Option<PathBuf>, pool: Option<&PgPool>) -> anyhow::Result<Sink> {
    match (out_dir, pool) {
        (Some(dir), _) => Ok(Sink::Csv(dir)),
        (None, Some(pool)) => Ok(Sink::Postgres(pool.clone())),
        (None, None) => anyhow::bail!("no output sink: pass --out-dir or set DATABASE_URL"),
    }
}
