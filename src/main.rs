//! vantage CLI: visual grounding agent engine.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use vantage::agent::Agent;
use vantage::batch;
use vantage::capability::remote::Gateway;
use vantage::capability::ImageRef;
use vantage::config::EngineConfig;
use vantage::cost::COST;

#[derive(Parser)]
#[command(name = "vantage", version, about = "Visual grounding agent engine")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model gateway URL (overrides the config file).
    #[arg(long, global = true)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ground a single query in a single image.
    Run {
        /// Path to the image.
        #[arg(long)]
        image: PathBuf,

        /// Natural-language query to ground.
        #[arg(long)]
        query: String,
    },

    /// Run a JSONL task file, appending one result record per task.
    ///
    /// Tasks already present in the result file are skipped, so an
    /// interrupted batch resumes by re-running the same command.
    Batch {
        /// JSONL file with {task_id, image_path, query} lines.
        #[arg(long)]
        tasks: PathBuf,

        /// JSONL result file to append to.
        #[arg(long, default_value = "result.jsonl")]
        results: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = &cli.gateway {
        config.gateway.url = url.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let suite = Arc::new(Gateway::suite(&config.gateway));

    match cli.command {
        Commands::Run { image, query } => {
            tracing::info!(image = %image.display(), query, "processing");

            let mut agent = Agent::new(ImageRef(image), query, suite, &config);
            match agent.run()? {
                Some(entity) => {
                    tracing::info!(
                        bbox = ?entity.bbox,
                        confidence = entity.bbox_confidence,
                        "result"
                    );
                    println!("{}", serde_json::to_string(&entity).into_diagnostic()?);
                }
                None => {
                    tracing::warn!("target not found in image");
                    println!("null");
                }
            }
            tracing::info!(
                cost = COST.cost(),
                input_tokens = COST.input_tokens(),
                output_tokens = COST.output_tokens(),
                "total usage"
            );
        }

        Commands::Batch { tasks, results } => {
            tracing::info!(
                tasks = %tasks.display(),
                results = %results.display(),
                "starting batch"
            );
            let summary = batch::run(&tasks, &results, suite, &config)?;
            tracing::info!(
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                "batch finished"
            );
        }
    }

    Ok(())
}
