//! Main Entrypoint for the Chalkboard CLI
//!
//! This binary is responsible for:
//! 1. Parsing the command line.
//! 2. Loading configuration from the environment.
//! 3. Initializing logging.
//! 4. Running the lesson pipeline or a maintenance command.

use anyhow::Context;
use chalkboard_cli::{
    cli::{Cli, Command},
    commands::{self, Pipeline},
    config::Config,
};
use clap::Parser;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    match cli.command {
        Command::Run { topic } => {
            info!(
                topic = %topic,
                provider = ?config.general.provider,
                model = %config.general.model,
                "Starting lesson pipeline"
            );
            let pipeline = Pipeline::prepare(&config, &topic)?;
            // Workflow failures are reported but do not change the exit code.
            match pipeline.run().await {
                Ok(state) => match state.final_video_path {
                    Some(path) => {
                        info!(path = %path.display(), "Lesson complete");
                        println!("{}", path.display());
                    }
                    None => warn!("Pipeline finished without a final video"),
                },
                Err(e) => error!("Workflow failed: {e:#}"),
            }
        }
        Command::ClearCache { topic, key } => {
            commands::clear_cache(&config.sessions_dir, &topic, key.as_deref())?;
        }
        Command::CheckEnv => {
            let missing = commands::check_env(&config);
            if missing.is_empty() {
                info!("All external programs found");
            } else {
                warn!(missing = ?missing, "Some external programs are missing");
            }
        }
    }

    Ok(())
}
