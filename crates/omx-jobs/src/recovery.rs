//! Rebuilds terminal job records from persisted session artifacts.

use std::path::PathBuf;

use omx_core::system_time_to_utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::JobResult;
use crate::persister::result_snapshot_path;
use crate::registry::JobRecord;
use crate::session_store::{parse_job_id, SessionStore, SESSION_KEY_SEPARATOR};

/// Loads completed job records for ids missing from the registry.
#[derive(Debug, Clone)]
pub struct RecoveryLoader {
    sessions: SessionStore,
}

impl RecoveryLoader {
    pub fn new(sessions: SessionStore) -> Self {
        Self { sessions }
    }

    /// Returns a synthetic `Completed` record when a readable result snapshot
    /// exists for `job_id`; `None` otherwise. Never creates directories.
    pub async fn recover(&self, job_id: &str) -> JobResult<Option<JobRecord>> {
        let Some(session_dir) = self.locate_session_dir(job_id).await? else {
            return Ok(None);
        };

        let path = result_snapshot_path(&session_dir);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(job_id, path = %path.display(), "no persisted result to recover");
                return Ok(None);
            }
            Err(error) => {
                warn!(job_id, path = %path.display(), %error, "persisted result unreadable");
                return Ok(None);
            }
        };
        let result = match serde_json::from_str::<Value>(&raw) {
            Ok(result) => result,
            Err(error) => {
                warn!(job_id, path = %path.display(), %error, "persisted result is not valid json");
                return Ok(None);
            }
        };
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|metadata| metadata.modified())
            .map(system_time_to_utc)
            .unwrap_or_else(|_| chrono::Utc::now());

        debug!(job_id, path = %path.display(), "recovered completed job from disk");
        Ok(Some(JobRecord::completed_at(job_id, result, modified)))
    }

    async fn locate_session_dir(&self, job_id: &str) -> JobResult<Option<PathBuf>> {
        if job_id.contains(SESSION_KEY_SEPARATOR) {
            return Ok(parse_job_id(job_id).map(|key| self.sessions.path_for(&key)));
        }

        // Without an owner prefix the id can only be matched by session suffix.
        // Several owners may share that suffix; the first name in sort order wins.
        let mut matches = self.sessions.find_by_session_suffix(job_id).await?;
        if matches.len() > 1 {
            warn!(
                job_id,
                candidates = matches.len(),
                chosen = %matches[0].display(),
                "ambiguous session suffix during recovery"
            );
        }
        if matches.is_empty() {
            return Ok(None);
        }
        Ok(Some(matches.swap_remove(0)))
    }
}
