//! Foundational low-level utilities shared across omx crates.
//!
//! Provides atomic file-write helpers for session artifacts and the time
//! helpers used to stamp job records.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{write_json_pretty_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp_ms, elapsed_since_ms, system_time_to_utc};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::time::{Duration, UNIX_EPOCH};

    use serde_json::json;

    use super::*;

    #[test]
    fn system_time_to_utc_preserves_epoch_offset() {
        let stamp = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let converted = system_time_to_utc(stamp);
        assert_eq!(converted.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn elapsed_since_ms_saturates_for_future_start() {
        let future = current_unix_timestamp_ms().saturating_add(60_000);
        assert_eq!(elapsed_since_ms(future), 0);
    }

    #[test]
    fn write_text_atomic_writes_content_and_creates_parent() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "nope").expect_err("directory target");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn write_json_pretty_atomic_overwrites_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("analysis_results.json");
        write_json_pretty_atomic(&path, &json!({"success": false})).expect("first write");
        write_json_pretty_atomic(&path, &json!({"success": true, "rows": 5})).expect("overwrite");

        let raw = read_to_string(&path).expect("read");
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("\n  \"rows\": 5"));
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, json!({"success": true, "rows": 5}));

        let leftovers = std::fs::read_dir(tempdir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
