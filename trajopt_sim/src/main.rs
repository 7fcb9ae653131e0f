//! CLI entry point for the timing simulation harness: closed-loop runs and
//! one-shot plan sampling, with CSV and optional JSONL output.

mod harness;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use trajopt_rs::config::{Config, load_config};

/// Timing controller simulation harness
#[derive(Parser, Debug)]
#[command(name = "trajopt-sim", about = "Closed-loop simulation of the waypoint timing controller.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for CSV/JSONL
    #[arg(short, long, default_value = "./sim_output")]
    output: PathBuf,

    /// Also write JSON lines next to the CSV
    #[arg(long)]
    jsonl: bool,

    /// Log solver progress
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the closed loop (default)
    Run,
    /// Solve once from the start and sample the planned curve
    Plan {
        #[arg(long, default_value_t = 200)]
        samples: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = match &cli.config {
        Some(path) => load_config(&path.to_string_lossy())?,
        None => Config::default(),
    };
    std::fs::create_dir_all(&cli.output)?;

    let (name, records) = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = harness::run_closed_loop(&config)?;
            tracing::info!(
                "finished: {} after {:.3}s ({} control steps, phase {})",
                summary.finished,
                summary.elapsed,
                summary.records.len(),
                summary.final_phase
            );
            ("closed_loop", summary.records)
        }
        Commands::Plan { samples } => ("plan", harness::sample_plan(&config, samples)?),
    };

    let csv_path = cli.output.join(format!("{}.csv", name));
    harness::write_csv(&csv_path, &records)?;
    tracing::info!("wrote {}", csv_path.display());
    if cli.jsonl {
        let jsonl_path = cli.output.join(format!("{}.jsonl", name));
        harness::write_jsonl(&jsonl_path, &records)?;
        tracing::info!("wrote {}", jsonl_path.display());
    }
    Ok(())
}
