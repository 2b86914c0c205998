//! Per-session artifact directories keyed by `(owner, session)`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use omx_core::system_time_to_utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::{JobError, JobResult};
use crate::persister::{ANALYSIS_OPTIONS_FILE, PREPROCESSING_OPTIONS_FILE};

/// Separator between owner and session in directory names and job ids.
pub const SESSION_KEY_SEPARATOR: char = '_';

/// Identifies one session storage area.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub owner_id: String,
    pub session_id: String,
}

impl SessionKey {
    /// Builds a key after rejecting values that could escape the sessions root.
    pub fn new(owner_id: &str, session_id: &str) -> JobResult<Self> {
        validate_key_part("owner id", owner_id)?;
        validate_key_part("session id", session_id)?;
        Ok(Self {
            owner_id: owner_id.to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// Directory name and job id shared by every artifact of this session.
    pub fn joined(&self) -> String {
        format!(
            "{}{SESSION_KEY_SEPARATOR}{}",
            self.owner_id, self.session_id
        )
    }
}

/// Splits a job id at its first separator into a validated session key.
///
/// Returns `None` when the id has no separator or either half is unusable.
pub fn parse_job_id(job_id: &str) -> Option<SessionKey> {
    let (owner_id, session_id) = job_id.split_once(SESSION_KEY_SEPARATOR)?;
    SessionKey::new(owner_id, session_id).ok()
}

fn validate_key_part(label: &str, value: &str) -> JobResult<()> {
    if value.trim().is_empty() {
        return Err(JobError::Validation(format!("{label} must not be empty")));
    }
    if value == "." || value == ".." || value.contains("..") {
        return Err(JobError::Validation(format!(
            "{label} '{value}' must not contain '..'"
        )));
    }
    if value
        .chars()
        .any(|ch| ch == '/' || ch == '\\' || ch == '\0' || ch == ':')
    {
        return Err(JobError::Validation(format!(
            "{label} '{value}' must not contain path separators"
        )));
    }
    Ok(())
}

/// One regular file stored in a session directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFileEntry {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Snapshot of a session directory for introspection reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub session_id: String,
    pub session_dir: PathBuf,
    pub files: Vec<SessionFileEntry>,
    pub preprocessing_options: Option<Value>,
    pub analysis_options: Option<Value>,
}

/// Maps session keys to directories under one root.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Computes the directory for `key` without touching the filesystem.
    pub fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.root.join(key.joined())
    }

    /// Returns the session directory, creating it when absent.
    ///
    /// `create_dir_all` treats an already existing directory as success, so
    /// concurrent callers racing on the same key all succeed.
    pub async fn resolve(&self, owner_id: &str, session_id: &str) -> JobResult<PathBuf> {
        let key = SessionKey::new(owner_id, session_id)?;
        let dir = self.path_for(&key);
        tokio::fs::create_dir_all(&dir).await.map_err(|error| {
            JobError::Storage(format!(
                "failed to create session directory {}: {error}",
                dir.display()
            ))
        })?;
        Ok(dir)
    }

    /// Lists session directories whose name ends with `_<suffix>`, sorted by name.
    pub async fn find_by_session_suffix(&self, suffix: &str) -> JobResult<Vec<PathBuf>> {
        if suffix.is_empty() {
            return Ok(Vec::new());
        }
        let needle = format!("{SESSION_KEY_SEPARATOR}{suffix}");
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(JobError::Storage(format!(
                    "failed to read sessions root {}: {error}",
                    self.root.display()
                )))
            }
        };
        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(needle.as_str()) && entry.file_type().await?.is_dir() {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Describes an existing session: its files and option snapshots.
    pub async fn describe(&self, owner_id: &str, session_id: &str) -> JobResult<SessionInfo> {
        let key = SessionKey::new(owner_id, session_id)?;
        let dir = self.path_for(&key);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(JobError::RecoveryMiss(format!("session {}", key.joined())));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            files.push(SessionFileEntry {
                filename,
                size: metadata.len(),
                modified: system_time_to_utc(metadata.modified()?),
            });
        }
        files.sort_by(|left, right| left.filename.cmp(&right.filename));

        Ok(SessionInfo {
            user_id: key.owner_id.clone(),
            session_id: key.session_id.clone(),
            preprocessing_options: read_optional_json(&dir.join(PREPROCESSING_OPTIONS_FILE))
                .await?,
            analysis_options: read_optional_json(&dir.join(ANALYSIS_OPTIONS_FILE)).await?,
            session_dir: dir,
            files,
        })
    }

    /// Resolves a downloadable file inside a session directory.
    pub async fn file_path(
        &self,
        owner_id: &str,
        session_id: &str,
        filename: &str,
    ) -> JobResult<PathBuf> {
        let key = SessionKey::new(owner_id, session_id)?;
        validate_key_part("filename", filename)?;
        let path = self.path_for(&key).join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(JobError::RecoveryMiss(format!(
                "file '{filename}' in session {}",
                key.joined()
            ))),
        }
    }
}

async fn read_optional_json(path: &Path) -> JobResult<Option<Value>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(JobError::Storage(format!(
                "failed to read {}: {error}",
                path.display()
            )))
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|error| JobError::Storage(format!("failed to parse {}: {error}", path.display())))
}
