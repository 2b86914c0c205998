//! Wires sessions, registry, marshalling, engine execution and persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use omx_core::{current_unix_timestamp_ms, elapsed_since_ms};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

use crate::engine_args::{EngineArguments, EngineReport};
use crate::error::{JobError, JobFailure, JobResult};
use crate::file_resolver::FileContentResolver;
use crate::marshaller::ArgumentMarshaller;
use crate::persister::ResultPersister;
use crate::process_runner::{
    build_process_runner, EngineCommand, EngineInvocation, EngineOutcome, ProcessRunner,
    RunnerStrategy,
};
use crate::recovery::RecoveryLoader;
use crate::registry::{JobRecord, JobRegistry, JobState, SubmittedJob};
use crate::session_store::{SessionInfo, SessionKey, SessionStore};

pub const PREPROCESS_INPUT_PREFIX: &str = "original_";
pub const ANALYSIS_INPUT_PREFIX: &str = "analysis_";
pub const PROCESSED_OUTPUT_PREFIX: &str = "processed_";
const DEFAULT_PREPROCESS_SCRIPT: &str = "preprocess.R";
const DEFAULT_ANALYSIS_SCRIPT: &str = "analysis.R";
const DEFAULT_ENGINE_CHECK_SCRIPT: &str = "test_engine.R";
const ENGINE_CHECK_SAMPLE_SIZE: u32 = 10;
const DEFAULT_PREPROCESS_TIMEOUT_SECS: u64 = 300;
const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 600;
const DEFAULT_BLOCKING_WORKERS: usize = 4;

/// Runtime configuration for the job orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub sessions_root: PathBuf,
    pub scripts_dir: PathBuf,
    pub preprocess_script: String,
    pub analysis_script: String,
    /// Trivial script run by the engine integration check.
    pub engine_check_script: String,
    pub engine: EngineCommand,
    pub runner_strategy: RunnerStrategy,
    pub blocking_workers: usize,
    pub preprocess_timeout: Duration,
    pub analysis_timeout: Duration,
    pub argument_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sessions_root: PathBuf::from("user_sessions"),
            scripts_dir: PathBuf::from("."),
            preprocess_script: DEFAULT_PREPROCESS_SCRIPT.to_string(),
            analysis_script: DEFAULT_ANALYSIS_SCRIPT.to_string(),
            engine_check_script: DEFAULT_ENGINE_CHECK_SCRIPT.to_string(),
            engine: EngineCommand::default(),
            runner_strategy: RunnerStrategy::for_host(),
            blocking_workers: DEFAULT_BLOCKING_WORKERS,
            preprocess_timeout: Duration::from_secs(DEFAULT_PREPROCESS_TIMEOUT_SECS),
            analysis_timeout: Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
            argument_dir: None,
        }
    }
}

/// Input for an asynchronous analysis job.
#[derive(Debug)]
pub struct AnalysisSubmission<R> {
    pub owner_id: String,
    pub session_id: String,
    pub file_name: String,
    pub upload: Option<R>,
    pub preprocessing_options: Value,
    pub analysis_options: Value,
}

/// Input for a synchronous preprocessing call.
#[derive(Debug)]
pub struct PreprocessRequest<R> {
    pub owner_id: String,
    pub session_id: String,
    pub file_name: String,
    pub upload: Option<R>,
    pub options: Value,
}

/// Result of a successful preprocessing call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOutcome {
    pub processed_file: PathBuf,
    pub download_name: String,
    pub result: Value,
    pub diagnostics: Option<String>,
}

/// Counters reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestratorHealth {
    pub active_jobs: usize,
    pub tracked_jobs: usize,
    pub runner_strategy: &'static str,
}

/// Creates jobs, drives them through the engine and answers status reads.
#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    config: Arc<OrchestratorConfig>,
    registry: JobRegistry,
    sessions: SessionStore,
    recovery: RecoveryLoader,
    runner: Arc<dyn ProcessRunner>,
    marshaller: ArgumentMarshaller,
    persister: ResultPersister,
    resolver: FileContentResolver,
}

impl JobOrchestrator {
    /// Builds an orchestrator with the runner selected by `config.runner_strategy`.
    pub fn new(config: OrchestratorConfig, registry: JobRegistry) -> Self {
        let runner = build_process_runner(
            config.runner_strategy,
            config.engine.clone(),
            config.blocking_workers,
        );
        Self::with_runner(config, registry, runner)
    }

    /// Builds an orchestrator around an explicit runner.
    pub fn with_runner(
        config: OrchestratorConfig,
        registry: JobRegistry,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let sessions = SessionStore::new(config.sessions_root.clone());
        info!(
            sessions_root = %config.sessions_root.display(),
            scripts_dir = %config.scripts_dir.display(),
            runner_strategy = runner.strategy().as_str(),
            "job orchestrator ready"
        );
        Self {
            marshaller: ArgumentMarshaller::new(config.argument_dir.clone()),
            recovery: RecoveryLoader::new(sessions.clone()),
            config: Arc::new(config),
            registry,
            sessions,
            runner,
            persister: ResultPersister,
            resolver: FileContentResolver,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.config.as_ref()
    }

    /// Registers an analysis job and starts it in the background.
    ///
    /// Only validation, session and conflict errors are returned here; engine
    /// and storage failures land on the job record.
    pub async fn submit_analysis<R>(
        &self,
        submission: AnalysisSubmission<R>,
    ) -> JobResult<SubmittedJob>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let key = SessionKey::new(&submission.owner_id, &submission.session_id)?;
        let file_name = sanitize_file_name(&submission.file_name)?;
        let session_dir = self
            .sessions
            .resolve(&key.owner_id, &key.session_id)
            .await?;
        let job_id = key.joined();

        let task = self.clone();
        let task_job_id = job_id.clone();
        self.registry.submit(&job_id, async move {
            task.drive_analysis(task_job_id, session_dir, file_name, submission)
                .await;
        })
    }

    async fn drive_analysis<R>(
        self,
        job_id: String,
        session_dir: PathBuf,
        file_name: String,
        submission: AnalysisSubmission<R>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        if let Err(error) = self.registry.mark_running(&job_id) {
            warn!(job_id = job_id.as_str(), %error, "orchestration task lost ownership");
            return;
        }
        let started = current_unix_timestamp_ms();
        info!(job_id = job_id.as_str(), "analysis started");

        let settled = match self
            .execute_analysis(&job_id, &session_dir, &file_name, submission)
            .await
        {
            Ok(outcome) => {
                info!(
                    job_id = job_id.as_str(),
                    duration_ms = elapsed_since_ms(started),
                    "analysis completed"
                );
                let diagnostics = outcome.diagnostics();
                self.registry.complete(&job_id, outcome.result, diagnostics)
            }
            Err(failure) => {
                error!(
                    job_id = job_id.as_str(),
                    kind = failure.kind().as_str(),
                    duration_ms = elapsed_since_ms(started),
                    error = %failure,
                    "analysis failed"
                );
                self.registry
                    .fail(&job_id, JobFailure::from(&failure), None)
            }
        };
        if let Err(error) = settled {
            warn!(job_id = job_id.as_str(), %error, "could not settle job record");
        }
    }

    async fn execute_analysis<R>(
        &self,
        job_id: &str,
        session_dir: &Path,
        file_name: &str,
        submission: AnalysisSubmission<R>,
    ) -> JobResult<EngineOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let bytes = self
            .resolver
            .resolve(
                submission.upload,
                session_dir,
                &[ANALYSIS_INPUT_PREFIX, PREPROCESS_INPUT_PREFIX],
            )
            .await?;
        let input_file = session_dir.join(format!("{ANALYSIS_INPUT_PREFIX}{file_name}"));
        write_input(&input_file, &bytes).await?;

        self.persister
            .persist_options(
                session_dir,
                &submission.preprocessing_options,
                Some(&submission.analysis_options),
            )
            .await?;

        let arguments = EngineArguments::Analysis {
            input_file,
            output_dir: session_dir.to_path_buf(),
            preprocessing_options: submission.preprocessing_options,
            analysis_options: submission.analysis_options,
            analysis_id: job_id.to_string(),
        };
        let outcome = self
            .invoke_engine(
                &self.config.analysis_script,
                &arguments,
                self.config.analysis_timeout,
            )
            .await?;

        self.persister
            .persist_result(session_dir, &outcome.result)
            .await?;
        Ok(outcome)
    }

    /// Runs the preprocessing script and waits for the processed file.
    pub async fn run_preprocessing<R>(
        &self,
        request: PreprocessRequest<R>,
    ) -> JobResult<PreprocessOutcome>
    where
        R: AsyncRead + Unpin,
    {
        let key = SessionKey::new(&request.owner_id, &request.session_id)?;
        let file_name = sanitize_file_name(&request.file_name)?;
        let session_dir = self
            .sessions
            .resolve(&key.owner_id, &key.session_id)
            .await?;

        let bytes = self
            .resolver
            .resolve(request.upload, &session_dir, &[PREPROCESS_INPUT_PREFIX])
            .await?;
        let input_file = session_dir.join(format!("{PREPROCESS_INPUT_PREFIX}{file_name}"));
        write_input(&input_file, &bytes).await?;
        self.persister
            .persist_options(&session_dir, &request.options, None)
            .await?;

        let arguments = EngineArguments::Preprocessing {
            input_file,
            output_dir: session_dir.clone(),
            options: request.options,
        };
        let outcome = self
            .invoke_engine(
                &self.config.preprocess_script,
                &arguments,
                self.config.preprocess_timeout,
            )
            .await?;

        let report = EngineReport::from_value(&outcome.result).ok_or_else(|| {
            JobError::OutputFormat {
                parse_error: "preprocessing result is not an object".to_string(),
                stdout_excerpt: outcome.result.to_string(),
            }
        })?;
        if !report.success {
            return Err(JobError::EngineRejected(
                report
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        let processed_file = report
            .processed_file_path
            .ok_or_else(|| JobError::Storage("processed file path missing".to_string()))?;
        if !tokio::fs::try_exists(&processed_file).await.unwrap_or(false) {
            return Err(JobError::Storage(format!(
                "processed file not found: {}",
                processed_file.display()
            )));
        }

        info!(
            session = key.joined().as_str(),
            processed = %processed_file.display(),
            "preprocessing completed"
        );
        Ok(PreprocessOutcome {
            processed_file,
            download_name: format!("{PROCESSED_OUTPUT_PREFIX}{file_name}"),
            diagnostics: outcome.diagnostics(),
            result: outcome.result,
        })
    }

    async fn invoke_engine(
        &self,
        script: &str,
        arguments: &EngineArguments,
        timeout: Duration,
    ) -> JobResult<EngineOutcome> {
        // Dropping `args_file` at the end of this scope deletes it on every path.
        let args_file = self.marshaller.write(arguments)?;
        let invocation = EngineInvocation {
            script_path: self.config.scripts_dir.join(script),
            args_path: args_file.path().to_path_buf(),
            timeout,
        };
        self.runner.run(&invocation).await
    }

    /// Runs the configured check script through the runner and returns its
    /// parsed output. No session or job state is touched.
    pub async fn check_engine(&self) -> JobResult<Value> {
        let args_file = self
            .marshaller
            .write(&json!({ "numbers": ENGINE_CHECK_SAMPLE_SIZE }))?;
        let invocation = EngineInvocation {
            script_path: self.config.scripts_dir.join(&self.config.engine_check_script),
            args_path: args_file.path().to_path_buf(),
            timeout: self.config.preprocess_timeout,
        };
        let outcome = self.runner.run(&invocation).await?;
        debug!(
            script = self.config.engine_check_script.as_str(),
            "engine check passed"
        );
        Ok(outcome.result)
    }

    /// Current state of a job, from the registry or a persisted result.
    pub async fn status(&self, job_id: &str) -> JobResult<JobState> {
        self.result(job_id).await.map(|record| record.state)
    }

    /// Looks up a job in the registry, then on disk.
    pub async fn result(&self, job_id: &str) -> JobResult<JobRecord> {
        if let Some(record) = self.registry.get(job_id) {
            return Ok(record);
        }
        match self.recovery.recover(job_id).await? {
            Some(record) => Ok(record),
            None => Err(JobError::RecoveryMiss(format!("analysis '{job_id}'"))),
        }
    }

    pub async fn session_info(&self, owner_id: &str, session_id: &str) -> JobResult<SessionInfo> {
        self.sessions.describe(owner_id, session_id).await
    }

    pub async fn session_file(
        &self,
        owner_id: &str,
        session_id: &str,
        filename: &str,
    ) -> JobResult<PathBuf> {
        self.sessions.file_path(owner_id, session_id, filename).await
    }

    pub fn health(&self) -> OrchestratorHealth {
        OrchestratorHealth {
            active_jobs: self.registry.active_count(),
            tracked_jobs: self.registry.len(),
            runner_strategy: self.runner.strategy().as_str(),
        }
    }
}

fn sanitize_file_name(raw: &str) -> JobResult<String> {
    let name = Path::new(raw.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_default();
    if name.is_empty() || name == ".." {
        return Err(JobError::Validation(format!(
            "upload file name '{raw}' is not usable"
        )));
    }
    Ok(name)
}

async fn write_input(path: &Path, bytes: &[u8]) -> JobResult<()> {
    tokio::fs::write(path, bytes).await.map_err(|error| {
        JobError::Storage(format!("failed to store input {}: {error}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::sanitize_file_name;
    use crate::error::JobError;

    #[test]
    fn unit_sanitize_file_name_strips_directories() {
        assert_eq!(
            sanitize_file_name("../../etc/data.csv").expect("name"),
            "data.csv"
        );
        assert_eq!(sanitize_file_name(" data.csv ").expect("name"), "data.csv");
        assert!(matches!(
            sanitize_file_name(""),
            Err(JobError::Validation(_))
        ));
        assert!(matches!(
            sanitize_file_name("/"),
            Err(JobError::Validation(_))
        ));
    }
}
