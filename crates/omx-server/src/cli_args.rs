use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use omx_gateway::GatewayConfig;
use omx_jobs::{EngineCommand, OrchestratorConfig, RunnerStrategy};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_runner_strategy(value: &str) -> Result<RunnerStrategy, String> {
    RunnerStrategy::from_setting(value)
        .ok_or_else(|| format!("unknown runner strategy '{value}': expected auto, async or blocking"))
}

#[derive(Debug, Parser)]
#[command(
    name = "omx-server",
    about = "Asynchronous job orchestrator for the omics analysis engine",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "OMX_BIND",
        default_value = "127.0.0.1:8000",
        help = "HTTP listen address in host:port form"
    )]
    pub bind: String,

    #[arg(
        long = "sessions-root",
        env = "OMX_SESSIONS_ROOT",
        default_value = "user_sessions",
        help = "Directory holding one sub-directory per user session"
    )]
    pub sessions_root: PathBuf,

    #[arg(
        long = "scripts-dir",
        env = "OMX_SCRIPTS_DIR",
        default_value = ".",
        help = "Directory containing the engine scripts"
    )]
    pub scripts_dir: PathBuf,

    #[arg(
        long = "preprocess-script",
        env = "OMX_PREPROCESS_SCRIPT",
        default_value = "preprocess.R",
        help = "Preprocessing script name, relative to --scripts-dir"
    )]
    pub preprocess_script: String,

    #[arg(
        long = "analysis-script",
        env = "OMX_ANALYSIS_SCRIPT",
        default_value = "analysis.R",
        help = "Analysis script name, relative to --scripts-dir"
    )]
    pub analysis_script: String,

    #[arg(
        long = "engine-check-script",
        env = "OMX_ENGINE_CHECK_SCRIPT",
        default_value = "test_engine.R",
        help = "Trivial script run by GET /test_r, relative to --scripts-dir"
    )]
    pub engine_check_script: String,

    #[arg(
        long = "engine-program",
        env = "OMX_ENGINE_PROGRAM",
        default_value = "Rscript",
        help = "Engine executable; resolved through PATH when not absolute"
    )]
    pub engine_program: PathBuf,

    #[arg(
        long = "engine-arg",
        env = "OMX_ENGINE_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true,
        help = "Extra arguments placed before the script path (repeatable or comma separated)"
    )]
    pub engine_args: Vec<String>,

    #[arg(
        long = "preprocess-timeout-secs",
        env = "OMX_PREPROCESS_TIMEOUT_SECS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        help = "Wall-clock limit for one preprocessing engine run"
    )]
    pub preprocess_timeout_secs: u64,

    #[arg(
        long = "analysis-timeout-secs",
        env = "OMX_ANALYSIS_TIMEOUT_SECS",
        default_value_t = 600,
        value_parser = parse_positive_u64,
        help = "Wall-clock limit for one analysis engine run"
    )]
    pub analysis_timeout_secs: u64,

    #[arg(
        long = "runner-strategy",
        env = "OMX_RUNNER_STRATEGY",
        default_value = "auto",
        value_parser = parse_runner_strategy,
        help = "How engine processes are awaited: auto, async or blocking"
    )]
    pub runner_strategy: RunnerStrategy,

    #[arg(
        long = "blocking-workers",
        env = "OMX_BLOCKING_WORKERS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Concurrent engine runs allowed under the blocking strategy"
    )]
    pub blocking_workers: usize,

    #[arg(
        long = "argument-dir",
        env = "OMX_ARGUMENT_DIR",
        help = "Directory for temporary engine argument files (defaults to the OS temp dir)"
    )]
    pub argument_dir: Option<PathBuf>,

    #[arg(
        long = "max-upload-bytes",
        env = "OMX_MAX_UPLOAD_BYTES",
        default_value_t = 100 * 1024 * 1024,
        value_parser = parse_positive_usize,
        help = "Largest accepted multipart request body"
    )]
    pub max_upload_bytes: usize,
}

impl Cli {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            sessions_root: self.sessions_root.clone(),
            scripts_dir: self.scripts_dir.clone(),
            preprocess_script: self.preprocess_script.clone(),
            analysis_script: self.analysis_script.clone(),
            engine_check_script: self.engine_check_script.clone(),
            engine: EngineCommand {
                program: self.engine_program.clone(),
                args: self.engine_args.clone(),
            },
            runner_strategy: self.runner_strategy,
            blocking_workers: self.blocking_workers,
            preprocess_timeout: Duration::from_secs(self.preprocess_timeout_secs),
            analysis_timeout: Duration::from_secs(self.analysis_timeout_secs),
            argument_dir: self.argument_dir.clone(),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            bind: self.bind.clone(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}
