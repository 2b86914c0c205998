//! Engine argument files with scoped lifetime.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{JobError, JobResult};

const ARGUMENT_FILE_PREFIX: &str = "omx-args-";
const ARGUMENT_FILE_SUFFIX: &str = ".json";

/// Temporary JSON argument file handed to the engine.
///
/// The file is removed when this value is dropped, whichever way the
/// invocation ended.
#[derive(Debug)]
pub struct ArgumentFile {
    file: NamedTempFile,
}

impl ArgumentFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Serializes engine arguments into temporary files.
#[derive(Debug, Clone, Default)]
pub struct ArgumentMarshaller {
    temp_dir: Option<PathBuf>,
}

impl ArgumentMarshaller {
    /// Uses the OS temp directory unless `temp_dir` is given.
    pub fn new(temp_dir: Option<PathBuf>) -> Self {
        Self { temp_dir }
    }

    /// Writes `payload` as UTF-8 JSON to a fresh temporary file.
    pub fn write<T>(&self, payload: &T) -> JobResult<ArgumentFile>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec_pretty(payload).map_err(|error| {
            JobError::Storage(format!("failed to encode engine arguments: {error}"))
        })?;

        let mut builder = tempfile::Builder::new();
        builder
            .prefix(ARGUMENT_FILE_PREFIX)
            .suffix(ARGUMENT_FILE_SUFFIX);
        let created = match self.temp_dir.as_deref() {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.map_err(|error| {
            JobError::Storage(format!("failed to create engine argument file: {error}"))
        })?;
        file.write_all(&encoded)
            .and_then(|()| file.flush())
            .map_err(|error| {
                JobError::Storage(format!(
                    "failed to write engine argument file {}: {error}",
                    file.path().display()
                ))
            })?;
        Ok(ArgumentFile { file })
    }
}

#[cfg(test)]
mod tests {
    use super::ArgumentMarshaller;
    use crate::error::JobError;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn functional_write_produces_json_file_removed_on_drop() {
        let temp = tempdir().expect("tempdir");
        let marshaller = ArgumentMarshaller::new(Some(temp.path().to_path_buf()));
        let payload = json!({
            "input_file": "/data/U1_S1/analysis_data.csv",
            "output_dir": "/data/U1_S1",
            "options": {"transformation": "log2"},
        });

        let file = marshaller.write(&payload).expect("write args");
        let path = file.path().to_path_buf();
        assert!(path.starts_with(temp.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("omx-args-") && name.ends_with(".json"));

        let raw = std::fs::read_to_string(&path).expect("read args");
        let decoded: serde_json::Value = serde_json::from_str(&raw).expect("decode args");
        assert_eq!(decoded, payload);

        drop(file);
        assert!(!path.exists(), "argument file must be removed on release");
    }

    #[test]
    fn regression_missing_temp_dir_surfaces_storage_error() {
        let temp = tempdir().expect("tempdir");
        let marshaller = ArgumentMarshaller::new(Some(temp.path().join("does-not-exist")));
        let error = marshaller
            .write(&json!({"input_file": "x"}))
            .expect_err("missing directory");
        assert!(matches!(error, JobError::Storage(_)));
    }
}
