use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reappointment_trends::{loader, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "reappointment-trends")]
#[command(version)]
#[command(about = "Detect reappointments in appointment records and test the annual trend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge per-year CSV files (year taken from the file name) into one CSV
    Combine {
        /// Directory holding the yearly files
        #[arg(long)]
        input_dir: PathBuf,

        /// Combined CSV to write
        #[arg(long)]
        output: PathBuf,

        /// Optional JSON config (column aliases)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run every stage on a combined CSV and write the stage outputs
    Run {
        /// Combined CSV
        #[arg(long)]
        input: PathBuf,

        /// Directory for the stage tables and the trend report
        #[arg(long)]
        output_dir: PathBuf,

        /// Optional JSON config
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Combine { input_dir, output, config } => run_combine(input_dir, output, config),
        Commands::Run { input, output_dir, config } => run_pipeline(input, output_dir, config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(&path),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_combine(input_dir: PathBuf, output: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;

    println!("📂 Combining yearly files from {}", input_dir.display());
    let rows = loader::combine_yearly_files(&input_dir, &config)?;
    loader::write_combined(&output, &rows)?;

    println!("✓ Wrote {} rows to {}", rows.len(), output.display());
    Ok(())
}

fn run_pipeline(input: PathBuf, output_dir: PathBuf, config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let pipeline = Pipeline::from_config(config)?;

    println!("📂 Loading {}", input.display());
    let raws = loader::read_combined(&input, pipeline.config())?;
    info!(rows = raws.len(), "loaded combined dataset");

    let output = pipeline
        .run(&raws)
        .with_context(|| format!("Pipeline failed for {}", input.display()))?;
    pipeline.write_outputs(&output, &output_dir)?;

    let report = &output.report;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📊 {}", report.summary());
    if report.has_integrity_warnings() {
        println!(
            "⚠️  {} org-year rows failed integrity checks",
            report.integrity_warnings.len()
        );
    }
    println!("\n📈 {}", report.conclusion);
    println!("\n✓ Outputs written to {}", output_dir.display());

    Ok(())
}
