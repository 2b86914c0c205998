#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use omx_jobs::{classify_outcome, JobError};

fuzz_target!(|data: &[u8]| {
    let Some((&exit_byte, rest)) = data.split_first() else {
        return;
    };
    let split = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
    let stdout = rest[..split].to_vec();
    let stderr = rest.get(split + 1..).unwrap_or_default().to_vec();
    let exit_code = i32::from(exit_byte % 4);

    let stdout_text = String::from_utf8_lossy(&stdout).into_owned();
    let parsed = serde_json::from_str::<serde_json::Value>(stdout_text.trim());

    match classify_outcome(Path::new("fuzz.R"), stdout, stderr, Some(exit_code)) {
        Ok(outcome) => {
            assert_eq!(exit_code, 0);
            assert_eq!(Some(outcome.result), parsed.ok());
        }
        Err(JobError::ProcessFailure { exit_code: code, .. }) => {
            assert_ne!(exit_code, 0);
            assert_eq!(code, exit_code);
        }
        Err(JobError::OutputFormat { .. }) => {
            assert_eq!(exit_code, 0);
            assert!(parsed.is_err());
        }
        Err(other) => panic!("unexpected classification: {other:?}"),
    }
});
