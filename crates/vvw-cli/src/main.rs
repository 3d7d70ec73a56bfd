use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vvw_core::RunConfig;

const DEFAULT_CONFIG: &str = "config/input.example.json";

#[derive(Debug, Parser)]
#[command(name = "vvw-cli")]
#[command(about = "Vacuum Voice Weekly: harvest, tag and report on robot vacuum discussions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest, analyze and write the weekly report plus run artifacts.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        #[arg(long)]
        template: Option<PathBuf>,
        /// Output root; overrides VVW_OUTPUT_DIR.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the search queries a config would produce.
    Queries {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Re-run the analyzer over a saved corpus.json.
    Analyze {
        #[arg(long)]
        corpus: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vvw=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run {
        config: PathBuf::from(DEFAULT_CONFIG),
        template: None,
        out: None,
    });

    match command {
        Commands::Run {
            config,
            template,
            out,
        } => {
            let summary = vvw_sync::run_from_paths(&config, template.as_deref(), out).await?;
            info!(run_id = %summary.run_id, "run complete");
            println!(
                "run complete: run_id={} mode={} items={} comments={} retry_used={} dir={}",
                summary.run_id,
                summary.mode.as_str(),
                summary.items,
                summary.comments,
                summary.retry_used,
                summary.run_dir
            );
            for artifact in &summary.artifacts {
                println!("  {} sha256={}", artifact.name, artifact.sha256);
            }
        }
        Commands::Queries { config } => {
            let config = RunConfig::from_path(&config)
                .with_context(|| format!("loading run config {}", config.display()))?;
            for query in vvw_sync::build_queries(&config) {
                println!("{query}");
            }
        }
        Commands::Analyze { corpus } => {
            let items = vvw_sync::load_corpus(&corpus).await?;
            let analysis = vvw_sync::CorpusAnalyzer::new()
                .context("compiling tag lexicons")?
                .analyze(&items);
            println!(
                "{}",
                serde_json::to_string_pretty(&analysis).context("serializing analysis")?
            );
        }
    }

    Ok(())
}
