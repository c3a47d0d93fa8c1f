//! `strata` -- run the pipeline and inspect published artifacts.
//!
//! Exit codes mirror the failure taxonomy: 0 success, 2 precondition,
//! 3 contract store, 4 governance, 20..24 a fatal failure inside the
//! corresponding stage.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use strata_core::{RunId, Stage};
use strata_pipeline::{run_pipeline, Config, PipelineError, RunOptions};
use strata_store::{ArtifactStore, StoreError};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Strata pipeline orchestrator.
#[derive(Parser)]
#[command(name = "strata", version, about = "Strata data pipeline orchestrator")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to the config file (default: strata.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline end to end: ingest, clean, model, feature, segment
    Run {
        /// Reuse an explicit ingest run id instead of minting one
        #[arg(long)]
        run_id: Option<String>,
        /// Seed for the segmentation fit
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Draft transforms with deterministic heuristics, skipping the model call
        #[arg(long)]
        skip_generation: bool,
        /// Override the artifact root from the config
        #[arg(long)]
        artifacts: Option<PathBuf>,
        /// Override the CRM export directory from the config
        #[arg(long)]
        source_crm: Option<PathBuf>,
        /// Override the ERP export directory from the config
        #[arg(long)]
        source_erp: Option<PathBuf>,
    },

    /// Print the most recent run id for a stage
    Latest {
        /// Stage to look up (ingest|clean|model|feature|segment)
        stage: Stage,
        /// Override the artifact root from the config
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Print the manifest of one published run
    Show {
        /// Stage the run belongs to
        stage: Stage,
        /// Run id, e.g. 20250114_093010_#a1b2c3
        run_id: String,
        /// Override the artifact root from the config
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => fail(&e, cli.output, cli.quiet),
    };

    match cli.command {
        Commands::Run {
            run_id,
            seed,
            skip_generation,
            artifacts,
            source_crm,
            source_erp,
        } => {
            let mut config = config;
            if let Some(p) = artifacts {
                config.artifacts = p;
            }
            if let Some(p) = source_crm {
                config.source_crm = p;
            }
            if let Some(p) = source_erp {
                config.source_erp = p;
            }
            let options = RunOptions {
                seed,
                run_id,
                skip_generation,
            };
            cmd_run(&config, &options, cli.output, cli.quiet);
        }
        Commands::Latest { stage, artifacts } => {
            cmd_latest(store(&config, artifacts), stage, cli.output, cli.quiet);
        }
        Commands::Show {
            stage,
            run_id,
            artifacts,
        } => {
            cmd_show(store(&config, artifacts), stage, &run_id, cli.output, cli.quiet);
        }
    }
}

fn store(config: &Config, artifacts: Option<PathBuf>) -> ArtifactStore {
    ArtifactStore::new(artifacts.as_ref().unwrap_or(&config.artifacts))
}

fn cmd_run(config: &Config, options: &RunOptions, output: OutputFormat, quiet: bool) {
    match run_pipeline(config, options) {
        Ok(report) => match output {
            OutputFormat::Text => {
                if !quiet {
                    print!("{}", report.render_text());
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).unwrap_or_default()
                );
            }
        },
        Err(e) => fail(&e, output, quiet),
    }
}

fn cmd_latest(store: ArtifactStore, stage: Stage, output: OutputFormat, quiet: bool) {
    let latest = match store.latest(stage) {
        Ok(v) => v,
        Err(e) => fail(&PipelineError::Contract(e), output, quiet),
    };
    match latest {
        Some(run_id) => match output {
            OutputFormat::Text => println!("{}", run_id),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "stage": stage, "run_id": run_id })
                );
            }
        },
        None => {
            let e = PipelineError::Contract(StoreError::RunNotFound {
                stage: stage.to_string(),
                run_id: "latest".to_string(),
            });
            fail(&e, output, quiet)
        }
    }
}

fn cmd_show(store: ArtifactStore, stage: Stage, run_id: &str, output: OutputFormat, quiet: bool) {
    let run_id = match RunId::parse(run_id) {
        Ok(id) => id,
        Err(e) => fail(&PipelineError::from(e), output, quiet),
    };
    let manifest = match store.read(stage, &run_id) {
        Ok(m) => m,
        Err(e) => fail(&PipelineError::Contract(e), output, quiet),
    };
    match output {
        OutputFormat::Text => {
            println!(
                "run={} stage={} status={}",
                manifest.run_id,
                manifest.stage,
                serde_json::to_value(manifest.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            );
            println!(
                "rows_in={} rows_out={} duration={:.2}s",
                manifest.rows_in, manifest.rows_out, manifest.duration_s
            );
            if let Some(up) = &manifest.upstream {
                println!("upstream={}:{}", up.stage, up.run_id);
            }
            for f in &manifest.files {
                println!("  {} ({} rows, {} columns)", f.path, f.rows, f.columns.len());
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&manifest).unwrap_or_default()
            );
        }
    }
}

/// Report a pipeline error and exit with its taxonomy code.
fn fail(e: &PipelineError, output: OutputFormat, quiet: bool) -> ! {
    if !quiet {
        match output {
            OutputFormat::Text => eprintln!("error: {}", e),
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({ "error": e.to_string(), "code": e.exit_code() })
                );
            }
        }
    }
    process::exit(e.exit_code());
}
