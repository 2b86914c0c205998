mod cli_args;

use anyhow::{Context, Result};
use clap::Parser;
use omx_gateway::run_gateway;
use omx_jobs::{JobOrchestrator, JobRegistry};
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli_args::Cli;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.orchestrator_config();
    tokio::fs::create_dir_all(&config.sessions_root)
        .await
        .with_context(|| {
            format!(
                "failed to create sessions root '{}'",
                config.sessions_root.display()
            )
        })?;
    for script in [&config.preprocess_script, &config.analysis_script] {
        let path = config.scripts_dir.join(script);
        if !path.is_file() {
            warn!(script = %path.display(), "engine script not found; calls using it will fail");
        }
    }

    let orchestrator = JobOrchestrator::new(config, JobRegistry::new());
    run_gateway(cli.gateway_config(), orchestrator).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}
