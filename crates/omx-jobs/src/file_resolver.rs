//! Secures uploaded input bytes, falling back to copies already on disk.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::{JobError, JobResult};

/// Reads upload bodies with a session-directory fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileContentResolver;

impl FileContentResolver {
    /// Returns the upload's bytes. When the upload is absent, already drained,
    /// or fails mid-read, the most recently modified file in `session_dir`
    /// whose name starts with one of `name_prefixes` is read instead.
    pub async fn resolve<R>(
        &self,
        upload: Option<R>,
        session_dir: &Path,
        name_prefixes: &[&str],
    ) -> JobResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let upload_issue = match upload {
            Some(mut reader) => {
                let mut buffer = Vec::new();
                match reader.read_to_end(&mut buffer).await {
                    Ok(_) if !buffer.is_empty() => return Ok(buffer),
                    Ok(_) => "upload stream is empty or already consumed".to_string(),
                    Err(error) => format!("upload stream read failed: {error}"),
                }
            }
            None => "upload stream is unavailable".to_string(),
        };
        warn!(
            session_dir = %session_dir.display(),
            reason = upload_issue.as_str(),
            "falling back to stored session file"
        );

        let Some(candidate) = newest_matching_file(session_dir, name_prefixes).await? else {
            return Err(JobError::Storage(format!(
                "{upload_issue}; no stored file matching {name_prefixes:?} in {}",
                session_dir.display()
            )));
        };
        let bytes = tokio::fs::read(&candidate).await.map_err(|error| {
            JobError::Storage(format!(
                "{upload_issue}; failed to read fallback {}: {error}",
                candidate.display()
            ))
        })?;
        if bytes.is_empty() {
            return Err(JobError::Storage(format!(
                "{upload_issue}; fallback {} is empty",
                candidate.display()
            )));
        }
        debug!(fallback = %candidate.display(), bytes = bytes.len(), "using stored session file");
        Ok(bytes)
    }
}

async fn newest_matching_file(dir: &Path, prefixes: &[&str]) -> JobResult<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(JobError::Storage(format!(
                "failed to scan {}: {error}",
                dir.display()
            )))
        }
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !prefixes.iter().any(|prefix| name.starts_with(prefix)) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let is_newer = newest
            .as_ref()
            .map(|(current, _)| modified > *current)
            .unwrap_or(true);
        if is_newer {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::FileContentResolver;
    use crate::error::JobError;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;
    use tokio::io::{AsyncRead, ReadBuf};

    struct BrokenUpload;

    impl AsyncRead for BrokenUpload {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "upload closed",
            )))
        }
    }

    fn set_mtime(path: &std::path::Path, offset_secs: u64) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open for mtime");
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs))
            .expect("set mtime");
    }

    #[tokio::test]
    async fn functional_resolve_reads_upload_directly() {
        let temp = tempdir().expect("tempdir");
        let bytes = FileContentResolver
            .resolve(Some(&b"id,value\n1,2\n"[..]), temp.path(), &["original_"])
            .await
            .expect("resolve");
        assert_eq!(bytes, b"id,value\n1,2\n");
    }

    #[tokio::test]
    async fn functional_resolve_falls_back_when_upload_is_pre_closed() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("original_data.csv"), "id\n1\n2\n").expect("write");

        let bytes = FileContentResolver
            .resolve(Some(&b""[..]), temp.path(), &["analysis_", "original_"])
            .await
            .expect("resolve fallback");
        assert_eq!(bytes, b"id\n1\n2\n");
    }

    #[tokio::test]
    async fn regression_resolve_falls_back_on_read_error_and_picks_newest() {
        let temp = tempdir().expect("tempdir");
        let older = temp.path().join("original_old.csv");
        let newer = temp.path().join("analysis_new.csv");
        let ignored = temp.path().join("notes_latest.csv");
        std::fs::write(&older, "old").expect("write old");
        std::fs::write(&newer, "new").expect("write new");
        std::fs::write(&ignored, "ignored").expect("write ignored");
        set_mtime(&older, 10);
        set_mtime(&newer, 20);
        set_mtime(&ignored, 30);

        let bytes = FileContentResolver
            .resolve(Some(BrokenUpload), temp.path(), &["original_", "analysis_"])
            .await
            .expect("resolve fallback");
        assert_eq!(bytes, b"new");
    }

    #[tokio::test]
    async fn regression_resolve_fails_with_storage_error_when_nothing_usable() {
        let temp = tempdir().expect("tempdir");
        let error = FileContentResolver
            .resolve(None::<&[u8]>, temp.path(), &["original_"])
            .await
            .expect_err("no source");
        assert!(matches!(error, JobError::Storage(message) if message.contains("unavailable")));
    }
}
