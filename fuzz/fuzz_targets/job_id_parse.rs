#![no_main]

use libfuzzer_sys::fuzz_target;
use omx_jobs::{parse_job_id, SESSION_KEY_SEPARATOR};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Some(key) = parse_job_id(&raw) else {
        return;
    };
    assert_eq!(key.joined(), raw);
    assert!(!key.owner_id.contains(SESSION_KEY_SEPARATOR));
    for part in [&key.owner_id, &key.session_id] {
        assert!(!part.trim().is_empty());
        assert!(!part.contains(".."));
        assert!(!part.contains('/') && !part.contains('\\'));
    }
});
