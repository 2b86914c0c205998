use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use omx_jobs::{AnalysisSubmission, JobFailure, JobRecord, PreprocessRequest};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api_error::GatewayApiError;
use crate::endpoints::{
    ANALYSIS_OPTIONS_FIELD, OPTIONS_FIELD, PREPROCESSING_OPTIONS_FIELD, SESSION_ID_FIELD,
    USER_ID_FIELD,
};
use crate::request_options::{normalize_analysis_options, normalize_preprocessing_options};
use crate::upload_form::UploadForm;
use crate::GatewayState;

const SERVICE_MESSAGE: &str = "Omics Analysis Orchestrator API";
const OCTET_STREAM: &str = "application/octet-stream";

/// Client-facing view of a job record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResultView {
    pub id: String,
    pub status: &'static str,
    pub results: Option<Value>,
    pub error: Option<JobFailure>,
    pub diagnostics: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<JobRecord> for AnalysisResultView {
    fn from(record: JobRecord) -> Self {
        Self {
            status: record.state.as_str(),
            id: record.id,
            results: record.result,
            error: record.error,
            diagnostics: record.diagnostics,
            timestamp: record.updated_at,
        }
    }
}

pub(crate) async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": SERVICE_MESSAGE,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

pub(crate) async fn handle_health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let health = state.orchestrator.health();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "active_analyses": health.tracked_jobs,
        "running_analyses": health.active_jobs,
        "runner_strategy": health.runner_strategy,
    }))
}

pub(crate) async fn handle_engine_check(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    match state.orchestrator.check_engine().await {
        Ok(result) => Json(json!({
            "success": true,
            "message": "engine integration working",
            "result": result,
        })),
        Err(error) => {
            warn!(code = error.kind().as_str(), %error, "engine check failed");
            Json(json!({
                "success": false,
                "message": format!("engine integration failed: {error}"),
            }))
        }
    }
}

pub(crate) async fn handle_preprocess(
    State(state): State<Arc<GatewayState>>,
    multipart: Multipart,
) -> Result<Response, GatewayApiError> {
    let mut form = UploadForm::collect(multipart).await?;
    let options =
        normalize_preprocessing_options(OPTIONS_FIELD, form.required(OPTIONS_FIELD)?)?;
    let request = PreprocessRequest {
        owner_id: form.required(USER_ID_FIELD)?.to_string(),
        session_id: form.required(SESSION_ID_FIELD)?.to_string(),
        file_name: form.file_name()?.to_string(),
        upload: form.take_upload(),
        options,
    };

    let outcome = state.orchestrator.run_preprocessing(request).await?;
    let bytes = tokio::fs::read(&outcome.processed_file)
        .await
        .map_err(|error| {
            GatewayApiError::internal(format!(
                "failed to read processed file {}: {error}",
                outcome.processed_file.display()
            ))
        })?;
    Ok(attachment(&outcome.download_name, bytes))
}

pub(crate) async fn handle_analyze(
    State(state): State<Arc<GatewayState>>,
    multipart: Multipart,
) -> Result<Json<AnalysisResultView>, GatewayApiError> {
    let mut form = UploadForm::collect(multipart).await?;
    let preprocessing_options = normalize_preprocessing_options(
        PREPROCESSING_OPTIONS_FIELD,
        form.required(PREPROCESSING_OPTIONS_FIELD)?,
    )?;
    let analysis_options = normalize_analysis_options(
        ANALYSIS_OPTIONS_FIELD,
        form.required(ANALYSIS_OPTIONS_FIELD)?,
    )?;
    let submission = AnalysisSubmission {
        owner_id: form.required(USER_ID_FIELD)?.to_string(),
        session_id: form.required(SESSION_ID_FIELD)?.to_string(),
        file_name: form.file_name()?.to_string(),
        upload: form.take_upload(),
        preprocessing_options,
        analysis_options,
    };

    let submitted = state.orchestrator.submit_analysis(submission).await?;
    info!(job_id = submitted.record.id.as_str(), "analysis accepted");
    Ok(Json(AnalysisResultView::from(submitted.record)))
}

pub(crate) async fn handle_status(
    State(state): State<Arc<GatewayState>>,
    Path(analysis_id): Path<String>,
) -> Result<Json<&'static str>, GatewayApiError> {
    let job_state = state.orchestrator.status(&analysis_id).await?;
    Ok(Json(job_state.as_str()))
}

pub(crate) async fn handle_results(
    State(state): State<Arc<GatewayState>>,
    Path(analysis_id): Path<String>,
) -> Result<Json<AnalysisResultView>, GatewayApiError> {
    let record = state.orchestrator.result(&analysis_id).await?;
    Ok(Json(AnalysisResultView::from(record)))
}

pub(crate) async fn handle_session_info(
    State(state): State<Arc<GatewayState>>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Response, GatewayApiError> {
    let info = state
        .orchestrator
        .session_info(&user_id, &session_id)
        .await?;
    Ok((StatusCode::OK, Json(info)).into_response())
}

pub(crate) async fn handle_session_download(
    State(state): State<Arc<GatewayState>>,
    Path((user_id, session_id, filename)): Path<(String, String, String)>,
) -> Result<Response, GatewayApiError> {
    let path = state
        .orchestrator
        .session_file(&user_id, &session_id, &filename)
        .await?;
    let bytes = tokio::fs::read(&path).await.map_err(|error| {
        GatewayApiError::internal(format!("failed to read {}: {error}", path.display()))
    })?;
    Ok(attachment(&filename, bytes))
}

fn attachment(filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\', '\r', '\n'], "_")
    );
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, OCTET_STREAM.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}
