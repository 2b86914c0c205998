use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::time_utils::current_unix_timestamp_ms;

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Writes text using a temp file + rename so readers never observe partial data.
///
/// Concurrent writers targeting the same destination each use their own temp
/// file; the last rename wins.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("artifact"),
        std::process::id(),
        current_unix_timestamp_ms(),
        TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Serializes `value` as indented JSON with a trailing newline and writes it atomically.
pub fn write_json_pretty_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let mut payload = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to encode json for {}", path.display()))?;
    payload.push('\n');
    write_text_atomic(path, payload.as_str())
}
