use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use fx_pipeline::logging;
use fx_pipeline::pipeline::{Pipeline, PipelineRunResult, RangeRunResult};
use fx_pipeline::{Config, DateKey};

#[derive(Parser)]
#[command(name = "fx_pipeline")]
#[command(about = "Daily foreign-exchange rate pipeline with narrative reports")]
#[command(version)]
struct Cli {
    /// Path to a custom configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Detailed output (artifact paths, per-date errors, debug logs)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a single day
    Daily {
        /// Date in YYYY-MM-DD format (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Run the pipeline for every day of an inclusive range
    Historical {
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// Last date (YYYY-MM-DD)
        #[arg(long)]
        end: String,
    },
    /// Check configuration, credentials and data directories
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let _guard = logging::init_logging(level, &config.data_paths.logs);

    println!("🔄 Initializing exchange rate pipeline...");
    let pipeline = Pipeline::new(config).context("failed to initialize pipeline")?;

    match cli.command {
        Commands::Status => {
            print_status(&pipeline);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Daily { date } => {
            let date: DateKey = match date {
                Some(d) => d.parse()?,
                None => DateKey::today(),
            };
            pipeline.ensure_ready()?;

            println!("▶️  Running daily pipeline for {date}...");
            let Some(result) =
                unless_interrupted(pipeline.run_daily(date), tokio::signal::ctrl_c()).await
            else {
                println!("\n⚠️  Execution interrupted by user");
                return Ok(ExitCode::FAILURE);
            };
            Ok(print_daily(&result, cli.verbose))
        }
        Commands::Historical { start, end } => {
            pipeline.ensure_ready()?;

            println!("▶️  Running historical pipeline from {start} to {end}...");
            let Some(result) =
                unless_interrupted(pipeline.run_range(&start, &end), tokio::signal::ctrl_c()).await
            else {
                println!("\n⚠️  Execution interrupted by user; completed days keep their artifacts");
                return Ok(ExitCode::FAILURE);
            };
            print_range(&result?, cli.verbose);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Races `run` against an interrupt signal; `None` means the user interrupted.
/// A signal that fails to install is logged and the run goes on unguarded.
async fn unless_interrupted<T>(
    run: impl Future<Output = T>,
    signal: impl Future<Output = std::io::Result<()>>,
) -> Option<T> {
    tokio::pin!(run);
    tokio::select! {
        r = &mut run => return Some(r),
        res = signal => match res {
            Ok(()) => {
                warn!("interrupted by user");
                return None;
            }
            Err(e) => warn!(error = %e, "could not listen for Ctrl-C; running without it"),
        },
    }
    Some(run.await)
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(50));
    println!("{title}");
    println!("{}", "=".repeat(50));
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

fn print_status(pipeline: &Pipeline) {
    let status = pipeline.status();
    banner("PIPELINE STATUS");
    if status.pipeline_ready {
        println!("✅ Pipeline ready to run");
    } else {
        println!("❌ Pipeline is not ready");
        if let Some(missing) = &status.missing_keys {
            println!("   Error: {missing}");
        }
    }
    println!("{} Configuration loaded", mark(status.config_loaded));
    println!("{} Components initialized", mark(status.components_initialized));
    println!("\nData directories:");
    for (label, exists) in &status.data_paths {
        println!("   {} {label}", mark(*exists));
    }
}

fn print_daily(result: &PipelineRunResult, verbose: bool) -> ExitCode {
    banner("DAILY PIPELINE RESULTS");
    match result {
        PipelineRunResult::Completed {
            run_id,
            raw,
            normalized,
            aggregate,
            narrative,
            quality,
            mirror_error,
            elapsed,
            ..
        } => {
            println!("✅ Pipeline completed successfully");
            println!("   Execution time: {:.2}s", elapsed.as_secs_f64());
            println!("   Rates kept: {} (dropped {})", quality.kept, quality.total_dropped());
            if let Some(e) = mirror_error {
                println!("⚠️  Database mirror failed: {e}");
            }
            if verbose {
                println!("\nRun id: {run_id}");
                println!("\nGenerated files:");
                println!("   raw: {raw}");
                println!("   normalized: {normalized}");
                println!("   aggregate: {aggregate}");
                println!("   report_json: {}", narrative.report_json);
                println!("   report_txt: {}", narrative.report_txt.display());
                for (reason, count) in &quality.dropped {
                    println!("   dropped {reason}: {count}");
                }
            }
            info!(run_id = %run_id, "daily run finished");
            ExitCode::SUCCESS
        }
        PipelineRunResult::Failed { stage, error, elapsed, .. } => {
            println!("❌ Execution failed at stage '{stage}': {error}");
            println!("   Execution time: {:.2}s", elapsed.as_secs_f64());
            ExitCode::FAILURE
        }
    }
}

fn print_range(result: &RangeRunResult, verbose: bool) {
    banner("HISTORICAL PIPELINE RESULTS");
    println!("✅ Historical pipeline finished");
    println!("   Dates processed: {}", result.processed_dates.len());
    println!("   Errors: {}", result.errors.len());
    println!("   Total time: {:.2}s", result.total_elapsed.as_secs_f64());
    if verbose && !result.errors.is_empty() {
        println!("\nError details:");
        for failure in &result.errors {
            println!("   {} [{}]: {}", failure.date, failure.stage, failure.error);
        }
    }
}
