//! mongo-pg-migrate CLI - MongoDB export to PostgreSQL migration.

use clap::{Parser, Subcommand};
use mongo_pg_migrate::error::{EXIT_COMPLETED_WITH_ISSUES, EXIT_SUCCESS};
use mongo_pg_migrate::{
    Config, EntityKind, MigrateError, MigrationSummary, Orchestrator, Phase, RunOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mongo-pg-migrate")]
#[command(about = "Migrate a MongoDB export into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: export, map, transform, load, validate
    Run {
        /// Transform and plan the load without writing to PostgreSQL
        #[arg(long)]
        dry_run: bool,

        /// Reuse raw artifacts from an earlier export
        #[arg(long)]
        skip_export: bool,

        /// Skip post-load validation
        #[arg(long)]
        skip_validation: bool,

        /// Restrict the run to one entity kind
        #[arg(long)]
        only: Option<EntityKind>,

        /// Discard the persisted identity map and generate new UUIDs
        #[arg(long)]
        fresh_identities: bool,

        /// Skip kinds already loaded in the run recorded in --state-file
        #[arg(long)]
        resume: bool,
    },

    /// Export source documents to raw artifacts
    Export {
        /// Restrict the export to one entity kind
        #[arg(long)]
        only: Option<EntityKind>,
    },

    /// Build and persist the ObjectId to UUID identity map
    Map {
        /// Discard the persisted identity map and generate new UUIDs
        #[arg(long)]
        fresh_identities: bool,
    },

    /// Transform raw artifacts into destination records
    Transform {
        /// Restrict the transform to one entity kind
        #[arg(long)]
        only: Option<EntityKind>,
    },

    /// Load transformed records into PostgreSQL
    Load {
        /// Report what would be loaded without writing
        #[arg(long)]
        dry_run: bool,

        /// Restrict the load to one entity kind
        #[arg(long)]
        only: Option<EntityKind>,
    },

    /// Validate row counts, foreign keys and unique columns
    Validate {
        /// Restrict validation to one entity kind
        #[arg(long)]
        only: Option<EntityKind>,
    },

    /// Test source and database connections
    HealthCheck,
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

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler();

    if let Commands::HealthCheck = cli.command {
        return health_check(config, cli.output_json).await;
    }

    let (phase, options) = match cli.command {
        Commands::Run {
            dry_run,
            skip_export,
            skip_validation,
            only,
            fresh_identities,
            resume,
        } => (
            None,
            RunOptions {
                dry_run,
                skip_export,
                skip_validation,
                only,
                fresh_identities,
                resume,
            },
        ),
        Commands::Export { only } => (Some(Phase::Export), RunOptions { only, ..Default::default() }),
        Commands::Map { fresh_identities } => (
            Some(Phase::Map),
            RunOptions {
                fresh_identities,
                ..Default::default()
            },
        ),
        Commands::Transform { only } => {
            (Some(Phase::Transform), RunOptions { only, ..Default::default() })
        }
        Commands::Load { dry_run, only } => (
            Some(Phase::Load),
            RunOptions {
                dry_run,
                only,
                ..Default::default()
            },
        ),
        Commands::Validate { only } => {
            (Some(Phase::Validate), RunOptions { only, ..Default::default() })
        }
        Commands::HealthCheck => unreachable!(), // Handled above
    };

    // Phases that never write to PostgreSQL do not connect to it.
    let needs_destination = !options.dry_run
        && matches!(phase, None | Some(Phase::Load) | Some(Phase::Validate));
    let mut orchestrator = if needs_destination {
        Orchestrator::new(config).await?
    } else {
        Orchestrator::offline(config).await?
    };
    orchestrator = orchestrator.with_cancellation(cancel_token);
    if let Some(ref path) = cli.state_file {
        orchestrator = orchestrator.with_state_file(path.clone());
    }

    let result = match phase {
        None => orchestrator.run(&options).await,
        Some(phase) => orchestrator.run_phase(phase, &options).await,
    };
    orchestrator.close().await;
    let summary = result?;

    if cli.output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }

    Ok(if summary.has_issues() {
        EXIT_COMPLETED_WITH_ISSUES
    } else {
        EXIT_SUCCESS
    })
}

async fn health_check(config: Config, output_json: bool) -> Result<u8, MigrateError> {
    let orchestrator = Orchestrator::new(config).await?;
    let result = orchestrator.health_check().await?;
    orchestrator.close().await;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        println!(
            "  Source ({}): {} ({}ms)",
            result.source_type,
            if result.source_connected { "OK" } else { "FAILED" },
            result.source_latency_ms
        );
        if let Some(ref err) = result.source_error {
            println!("    Error: {}", err);
        }
        println!(
            "  Target ({}): {} ({}ms)",
            result.target_type,
            if result.target_connected { "OK" } else { "FAILED" },
            result.target_latency_ms
        );
        if let Some(ref err) = result.target_error {
            println!("    Error: {}", err);
        }
        println!(
            "\n  Overall: {}",
            if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    if !result.healthy {
        return Err(MigrateError::Config("Health check failed".to_string()));
    }
    Ok(EXIT_SUCCESS)
}

fn print_summary(summary: &MigrationSummary) {
    let title = if summary.dry_run { "Dry run" } else { "Migration" };
    println!("\n{} {}", title, summary.status.replace('_', " "));
    println!("  Run ID: {}", summary.run_id);
    println!("  Phases: {:?}", summary.phases);
    println!("  Duration: {:.2}s", summary.duration_seconds);

    for kind in &summary.kinds {
        let mut line = format!("  {:<22}", kind.kind.as_str());
        if kind.skipped {
            line.push_str(" skipped (already loaded)");
        }
        if let Some(n) = kind.exported {
            line.push_str(&format!(" exported={}", n));
        }
        if let Some(n) = kind.transformed {
            line.push_str(&format!(" transformed={}", n));
        }
        if let Some(ref load) = kind.load {
            line.push_str(&format!(
                " attempted={} succeeded={} failed={}",
                load.attempted,
                load.succeeded,
                load.failed()
            ));
        }
        if !kind.warnings.is_empty() {
            line.push_str(&format!(" warnings={}", kind.warnings.len()));
        }
        println!("{}", line);

        if let Some(ref error) = kind.error {
            println!("    Error: {}", error);
        }
        for record in &kind.record_errors {
            println!(
                "    Record {} ({}): {}",
                record.index,
                record.source_id.as_deref().unwrap_or("no _id"),
                record.error
            );
        }
        if let Some(ref load) = kind.load {
            for batch in &load.failed_batches {
                println!(
                    "    Batch at offset {} ({} records): {}",
                    batch.offset, batch.size, batch.error
                );
            }
        }
    }

    if let Some(ref validation) = summary.validation {
        println!(
            "\n  Validation: {} ({} issues)",
            if validation.valid { "VALID" } else { "INVALID" },
            validation.issue_count()
        );
        for issue in &validation.issues {
            println!("    {}", issue);
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json keeps stdout parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM. Batches already
/// committed stay committed; the run stops before the next one.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for kind in [SignalKind::interrupt(), SignalKind::terminate()] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived shutdown signal. Stopping after the current batch...");
                    token.cancel();
                });
            }
            Err(e) => tracing::warn!("Failed to install signal handler: {}", e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
