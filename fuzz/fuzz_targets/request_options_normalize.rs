#![no_main]

use libfuzzer_sys::fuzz_target;
use omx_gateway::request_options::{normalize_analysis_options, normalize_preprocessing_options};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(normalized) = normalize_preprocessing_options("options", &raw) {
        let again = normalize_preprocessing_options("options", &normalized.to_string())
            .expect("normalized preprocessing options reparse");
        assert_eq!(again, normalized);
    }
    if let Ok(normalized) = normalize_analysis_options("analysisOptions", &raw) {
        let again = normalize_analysis_options("analysisOptions", &normalized.to_string())
            .expect("normalized analysis options reparse");
        assert_eq!(again, normalized);
    }
});
