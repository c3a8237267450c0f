use clap::Parser;
use stagehand::{
    LoaderError, LoaderResult,
    config::LoaderConfig,
    manifest::Manifest,
    replay::{Replay, Scenario},
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Replays a navigation scenario against an application manifest and prints
/// one JSON report per step.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the application manifest
    #[arg(short, long)]
    manifest: PathBuf,

    /// Path to the navigation scenario
    #[arg(short, long)]
    scenario: PathBuf,

    /// Path to loader config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> LoaderResult<()> {
    let config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let manifest = Manifest::from_file(&cli.manifest)?;
    let scenario = Scenario::from_file(&cli.scenario)?;
    debug!(
        applications = manifest.applications.len(),
        steps = scenario.steps.len(),
        "manifest and scenario loaded"
    );

    let replay = Replay::new(config, manifest, scenario)?;
    for step in replay.run().await {
        let line = serde_json::to_string(&step)
            .map_err(|e| LoaderError::internal(format!("Failed to serialize report: {}", e)))?;
        println!("{line}");
    }

    info!(
        requests = replay.loader().requests().await.len(),
        active = ?replay.coordinator().context().records().active_keys(),
        "replay finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
