//! Job orchestration for the external analytical engine.
//!
//! Accepts analysis submissions, runs the engine script in a child process
//! with a bounded timeout, tracks job state in memory and persists terminal
//! results into per-session directories so they survive restarts.

pub mod engine_args;
pub mod error;
pub mod file_resolver;
pub mod marshaller;
pub mod orchestrator;
pub mod persister;
pub mod process_runner;
pub mod recovery;
pub mod registry;
pub mod session_store;

pub use engine_args::{EngineArguments, EngineReport};
pub use error::{JobError, JobErrorKind, JobFailure, JobResult};
pub use file_resolver::FileContentResolver;
pub use marshaller::{ArgumentFile, ArgumentMarshaller};
pub use orchestrator::{
    AnalysisSubmission, JobOrchestrator, OrchestratorConfig, OrchestratorHealth,
    PreprocessOutcome, PreprocessRequest,
};
pub use persister::{result_snapshot_path, ResultPersister};
pub use process_runner::{
    build_process_runner, classify_outcome, AsyncProcessRunner, BlockingProcessRunner,
    EngineCommand, EngineInvocation, EngineOutcome, ProcessRunner, RunnerStrategy,
};
pub use recovery::RecoveryLoader;
pub use registry::{JobHandle, JobRecord, JobRegistry, JobState, SubmittedJob};
pub use session_store::{
    parse_job_id, SessionFileEntry, SessionInfo, SessionKey, SessionStore, SESSION_KEY_SEPARATOR,
};
