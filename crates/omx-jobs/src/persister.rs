//! Writes option and result snapshots into session directories.

use std::path::{Path, PathBuf};

use omx_core::write_json_pretty_atomic;
use serde_json::Value;

use crate::error::{JobError, JobResult};

pub const PREPROCESSING_OPTIONS_FILE: &str = "preprocessing_options.json";
pub const ANALYSIS_OPTIONS_FILE: &str = "analysis_options.json";
pub const ANALYSIS_RESULTS_FILE: &str = "analysis_results.json";

/// Path of the result snapshot inside `session_dir`.
pub fn result_snapshot_path(session_dir: &Path) -> PathBuf {
    session_dir.join(ANALYSIS_RESULTS_FILE)
}

/// Persists terminal payloads and option snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultPersister;

impl ResultPersister {
    /// Writes `result` as indented JSON, replacing any prior snapshot.
    pub async fn persist_result(&self, session_dir: &Path, result: &Value) -> JobResult<PathBuf> {
        let path = result_snapshot_path(session_dir);
        write_json_blocking(path.clone(), result.clone()).await?;
        Ok(path)
    }

    /// Writes the options snapshot(s) used by a submission.
    pub async fn persist_options(
        &self,
        session_dir: &Path,
        preprocessing: &Value,
        analysis: Option<&Value>,
    ) -> JobResult<()> {
        write_json_blocking(
            session_dir.join(PREPROCESSING_OPTIONS_FILE),
            preprocessing.clone(),
        )
        .await?;
        if let Some(analysis) = analysis {
            write_json_blocking(session_dir.join(ANALYSIS_OPTIONS_FILE), analysis.clone()).await?;
        }
        Ok(())
    }
}

async fn write_json_blocking(path: PathBuf, value: Value) -> JobResult<()> {
    tokio::task::spawn_blocking(move || write_json_pretty_atomic(&path, &value))
        .await
        .map_err(|error| JobError::Storage(format!("snapshot writer task failed: {error}")))?
        .map_err(JobError::storage)
}
