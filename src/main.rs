use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod bayes;
mod config;
mod db;
mod error;
mod evaluation;
mod metrics;
mod models;
mod pipeline;
mod report;
mod scheduler;
mod source;
mod tokenizer;

use config::{EvaluationConfig, FallbackMode, GradeWeights};
use models::RawActivityRow;

#[derive(Parser)]
#[command(name = "course-outcome-classifier")]
#[command(about = "Course outcome grading and pass/fail prediction", long_about = None)]
struct Cli {
    /// Log level for diagnostics on stderr (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import raw activity rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute per student and course outcomes
    Classify {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        weights: WeightArgs,
        /// Skip writing outcomes to attendance_stats
        #[arg(long)]
        dry_run: bool,
    },
    /// Train the classifier and report held-out accuracy
    Evaluate {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        weights: WeightArgs,
        #[command(flatten)]
        evaluation: EvaluationArgs,
        /// Print the evaluation summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored outcomes
    Outcomes {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        weights: WeightArgs,
        #[command(flatten)]
        evaluation: EvaluationArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Read raw activity rows from CSV instead of Postgres
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl InputArgs {
    fn needs_database(&self, persist: bool) -> bool {
        self.csv.is_none() || persist
    }
}

#[derive(Args)]
struct WeightArgs {
    #[arg(long, requires = "w_todo", conflicts_with = "calc_date")]
    w_presence: Option<f64>,
    #[arg(long, requires = "w_presence")]
    w_todo: Option<f64>,
    /// Pick the weight pair from a calculation date (defaults to today)
    #[arg(long)]
    calc_date: Option<NaiveDate>,
}

impl WeightArgs {
    fn resolve(&self) -> anyhow::Result<GradeWeights> {
        match (self.w_presence, self.w_todo) {
            (Some(presence), Some(todo)) => Ok(GradeWeights::new(presence, todo)?),
            _ => {
                let calc_date = self.calc_date.unwrap_or_else(|| Utc::now().date_naive());
                Ok(GradeWeights::for_calc_date(calc_date))
            }
        }
    }
}

#[derive(Args)]
struct EvaluationArgs {
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,
    #[arg(long, value_enum, default_value_t = FallbackMode::Reference)]
    fallback: FallbackMode,
}

impl EvaluationArgs {
    fn resolve(&self) -> anyhow::Result<EvaluationConfig> {
        Ok(EvaluationConfig::new(
            self.seed,
            self.test_fraction,
            self.fallback,
        )?)
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_rows(
    input: &InputArgs,
    pool: Option<&PgPool>,
) -> anyhow::Result<Vec<RawActivityRow>> {
    match (&input.csv, pool) {
        (Some(path), _) => source::read_activity_csv(path),
        (None, Some(pool)) => db::fetch_activity_rows(pool).await,
        (None, None) => {
            let pool = connect().await?;
            db::fetch_activity_rows(&pool).await
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "course_outcome_classifier={},sqlx=warn",
            level.to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Imported {inserted} activity rows from {}.", csv.display());
        }
        Commands::Classify {
            input,
            weights,
            dry_run,
        } => {
            let weights = weights.resolve()?;
            let pool = if input.needs_database(!dry_run) {
                Some(connect().await?)
            } else {
                None
            };
            let rows = load_rows(&input, pool.as_ref()).await?;
            let metrics = pipeline::compute_outcomes(&rows, weights);

            for summary in report::summarize_by_label(&metrics.outcomes) {
                println!(
                    "- {}: {} (avg grade {:.2})",
                    summary.label, summary.count, summary.avg_grade
                );
            }
            if !metrics.failures.is_empty() {
                println!("{} entities skipped for data issues.", metrics.failures.len());
            }

            let Some(pool) = pool.filter(|_| !dry_run) else {
                return Ok(());
            };
            let run_id = uuid::Uuid::new_v4();
            let stored = db::store_outcomes(&pool, run_id, &metrics.outcomes).await?;
            println!("Stored {stored} outcomes (run {run_id}).");
        }
        Commands::Evaluate {
            input,
            weights,
            evaluation,
            json,
        } => {
            let weights = weights.resolve()?;
            let config = evaluation.resolve()?;
            let rows = load_rows(&input, None).await?;
            let run = pipeline::run(&rows, weights, &config)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&run.summary)?);
            } else {
                println!(
                    "Model's accuracy: {:.2}% over {} documents (run {}).",
                    run.summary.accuracy * 100.0,
                    run.documents.len(),
                    run.run_id
                );
            }
        }
        Commands::Outcomes { limit } => {
            let pool = connect().await?;
            let outcomes = db::fetch_outcomes(&pool).await?;

            if outcomes.is_empty() {
                println!("No outcomes stored yet.");
                return Ok(());
            }

            for outcome in outcomes.iter().take(limit) {
                println!(
                    "- student {} / course {}: {} grade {:.2} (todos {:.1}, presences {:.1}, adjustment {:+.2}, run {})",
                    outcome.student_id,
                    outcome.course_id,
                    outcome.success,
                    outcome.final_grade,
                    outcome.exam_component_score,
                    outcome.presence_score,
                    outcome.delay_bonus_adjustment,
                    outcome.run_id
                );
            }
        }
        Commands::Report {
            input,
            weights,
            evaluation,
            out,
        } => {
            let weights = weights.resolve()?;
            let config = evaluation.resolve()?;
            let rows = load_rows(&input, None).await?;
            let run = pipeline::run(&rows, weights, &config)?;
            let report =
                report::build_report(weights, &run.metrics, Some((&run.model, &run.summary)));
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
