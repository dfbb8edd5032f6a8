//! envmigrate CLI - dependency-ordered dataset migration between environments.

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use envmigrate::{
    Approver, Config, JobState, MigrateError, Mode, Orchestrator, ReferencePolicy, RunOutcome,
    RunPlan, TableStatus,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code of a run that finished but did not succeed.
const EXIT_TABLE_FAILURE: u8 = 3;
const EXIT_VALIDATION_FAILURE: u8 = 4;
const EXIT_CANCELLED: u8 = 5;

#[derive(Parser)]
#[command(name = "envmigrate")]
#[command(about = "Dependency-ordered dataset migration between table-store environments")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Override the source environment tag
    #[arg(long, global = true)]
    source_env: Option<String>,

    /// Override the target environment tag
    #[arg(long, global = true)]
    target_env: Option<String>,

    /// Override the directory receiving reports and checkpoints
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Override number of tables migrated concurrently
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Skip records with unresolved references instead of failing the table
    #[arg(long, global = true)]
    lenient: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the source and project counts, skips and duration
    Analyze,

    /// Run the full migration against an in-memory copy of the target
    DryRun,

    /// Migrate one table, capped at LIMIT records, without writing
    Test {
        /// Table to test
        table: String,

        /// Maximum source records to read
        limit: usize,
    },

    /// Migrate into the target environment
    Migrate {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,

        /// Resume from a checkpoint file
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Delete everything a checkpointed run created
    Rollback {
        /// Checkpoint file of the run
        checkpoint: PathBuf,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Show the state of a run
    Status {
        /// Checkpoint file (default: newest in the output directory)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

/// Asks on the terminal unless pre-approved.
struct PromptApprover {
    assume_yes: bool,
}

impl Approver for PromptApprover {
    fn approve(&self, plan: &RunPlan) -> bool {
        if self.assume_yes {
            return true;
        }
        if !std::io::stdin().is_terminal() {
            warn!("No terminal to confirm on; pass --yes to migrate non-interactively");
            return false;
        }

        eprintln!("\nRun {}: {} -> {}", plan.run_id, plan.source_environment, plan.target_environment);
        for (index, level) in plan.levels.iter().enumerate() {
            eprintln!("  Level {}: {}", index, level.join(", "));
        }
        let prompt = if plan.resumed {
            format!("Resume writing into '{}'?", plan.target_environment)
        } else {
            format!("Write into '{}'?", plan.target_environment)
        };
        confirm(&prompt)
    }
}

fn confirm(prompt: &str) -> bool {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    // Apply overrides
    if let Some(env) = cli.source_env.clone() {
        config.source.environment = env;
    }
    if let Some(env) = cli.target_env.clone() {
        config.target.environment = env;
    }
    if let Some(dir) = cli.output_dir.clone() {
        config.migration.output_dir = dir;
    }
    if let Some(w) = cli.workers {
        config.migration.workers = Some(w);
    }
    if cli.lenient {
        config.migration.reference_policy = ReferencePolicy::Lenient;
    }

    let (mode, approver, resume) = match cli.command {
        Commands::Analyze => (Mode::Analyze, None, None),
        Commands::DryRun => (Mode::DryRun, None, None),
        Commands::Test { table, limit } => (Mode::Test { table, limit }, None, None),
        Commands::Migrate { yes, resume } => (
            Mode::Migrate,
            Some(PromptApprover { assume_yes: yes }),
            resume,
        ),
        Commands::Rollback { checkpoint, yes } => {
            let prompt = format!(
                "Delete every record created by {} from '{}'?",
                checkpoint.display(),
                config.target.environment
            );
            if !yes && !(std::io::stdin().is_terminal() && confirm(&prompt)) {
                return Err(MigrateError::ConfirmationRequired);
            }
            (Mode::Rollback { checkpoint }, None, None)
        }
        Commands::Status { checkpoint } => (Mode::Status { checkpoint }, None, None),
    };

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    let mut orchestrator = Orchestrator::new(config)?.with_cancellation(cancel_token.clone());
    if let Some(approver) = approver {
        orchestrator = orchestrator.with_approver(approver);
    }
    if let Some(path) = resume {
        if !path.exists() {
            return Err(MigrateError::Config(format!(
                "Checkpoint not found: {:?}",
                path
            )));
        }
        orchestrator = orchestrator.resume_from(path);
    }

    // In-flight tables stop at their next batch boundary; give up waiting
    // after the shutdown timeout.
    let timeout = Duration::from_secs(cli.shutdown_timeout);
    let outcome = tokio::select! {
        outcome = orchestrator.run(mode) => outcome?,
        _ = async {
            cancel_token.cancelled().await;
            tokio::time::sleep(timeout).await;
        } => return Err(MigrateError::Cancelled),
    };

    if cli.output_json {
        println!("{}", outcome.to_json()?);
    } else {
        print_summary(&outcome);
    }

    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Migration(report) => match report.state {
            JobState::Completed => 0,
            _ if report
                .tables
                .iter()
                .any(|t| t.status == TableStatus::Cancelled) =>
            {
                EXIT_CANCELLED
            }
            _ if report.failed_tables().is_empty()
                && report.validation.as_ref().is_some_and(|v| !v.passed) =>
            {
                EXIT_VALIDATION_FAILURE
            }
            _ => EXIT_TABLE_FAILURE,
        },
        RunOutcome::Rollback(report) if !report.rollback.complete => EXIT_TABLE_FAILURE,
        _ => 0,
    }
}

fn print_summary(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Analysis(report) => {
            println!("\nAnalysis complete!");
            println!("  Run ID: {}", report.run_id);
            println!(
                "  {} -> {}",
                report.source_environment, report.target_environment
            );
            for table in &report.tables {
                println!(
                    "  [{}] {}: {} records, {} would migrate, {} would skip{}",
                    table.level,
                    table.table,
                    table.scanned,
                    table.would_migrate,
                    table.would_skip,
                    if table.exists_in_source { "" } else { " (absent)" }
                );
            }
            println!("  Total: {} records", report.total_records);
            println!(
                "  Estimated duration: {:.0}s",
                report.estimated_duration_seconds
            );
        }
        RunOutcome::Migration(report) => {
            let status_msg = match report.state {
                JobState::Completed if report.mode == "migrate" => "Migration completed!",
                JobState::Completed => "Run completed (no target writes)!",
                JobState::RolledBack => "Migration failed and was rolled back.",
                _ => "Migration failed.",
            };
            println!("\n{}", status_msg);
            println!("  Run ID: {}", report.run_id);
            println!("  Mode: {}", report.mode);
            println!("  Duration: {:.2}s", report.duration_seconds);
            for table in &report.tables {
                println!(
                    "  [{}] {}: {:?} ({} of {} records, {} skipped)",
                    table.level,
                    table.table,
                    table.status,
                    table.migrated_count,
                    table.source_count,
                    table.skipped_count
                );
            }
            println!("  Records: {}", report.records_migrated());
            if let Some(validation) = &report.validation {
                println!(
                    "  Validation: {}",
                    if validation.passed { "passed" } else { "FAILED" }
                );
            }
            if let Some(path) = &report.checkpoint {
                println!("  Checkpoint: {}", path.display());
            }
            if let Some(error) = &report.error {
                println!("  Error: {}", error);
            }
        }
        RunOutcome::Rollback(report) => {
            println!(
                "\nRollback {}",
                if report.rollback.complete { "completed!" } else { "incomplete." }
            );
            println!("  Run ID: {}", report.run_id);
            for table in &report.rollback.tables {
                println!(
                    "  {}: {} deleted, {} rows remain (baseline {})",
                    table.table, table.deleted, table.rows_after, table.baseline_rows
                );
            }
        }
        RunOutcome::Status(report) => {
            println!("\nRun {}: {:?}", report.run_id, report.state);
            println!(
                "  {} -> {}",
                report.source_environment, report.target_environment
            );
            println!("  Updated: {}", report.updated_at);
            for table in &report.tables {
                let status = table
                    .status
                    .as_ref()
                    .map_or_else(|| "not started".to_string(), |s| format!("{:?}", s));
                println!(
                    "  [{}] {}: {} ({} created, source {}, target {})",
                    table.level,
                    table.table,
                    status,
                    table.created_records,
                    rows(table.source_rows),
                    rows(table.target_rows)
                );
            }
        }
    }
}

fn rows(count: Option<u64>) -> String {
    count.map_or_else(|| "?".to_string(), |c| c.to_string())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
