//! Route paths served by the gateway.

pub(crate) const ROOT_ENDPOINT: &str = "/";
pub(crate) const HEALTH_ENDPOINT: &str = "/health";
pub(crate) const ENGINE_CHECK_ENDPOINT: &str = "/test_r";
pub(crate) const PREPROCESS_ENDPOINT: &str = "/preprocess";
pub(crate) const ANALYZE_ENDPOINT: &str = "/analyze";
pub(crate) const STATUS_ENDPOINT: &str = "/status/{analysis_id}";
pub(crate) const RESULTS_ENDPOINT: &str = "/results/{analysis_id}";
pub(crate) const SESSION_ENDPOINT: &str = "/session/{user_id}/{session_id}";
pub(crate) const SESSION_DOWNLOAD_ENDPOINT: &str =
    "/session/{user_id}/{session_id}/download/{filename}";

pub(crate) const FILE_FIELD: &str = "file";
pub(crate) const USER_ID_FIELD: &str = "userId";
pub(crate) const SESSION_ID_FIELD: &str = "sessionId";
pub(crate) const OPTIONS_FIELD: &str = "options";
pub(crate) const PREPROCESSING_OPTIONS_FIELD: &str = "preprocessingOptions";
pub(crate) const ANALYSIS_OPTIONS_FIELD: &str = "analysisOptions";
