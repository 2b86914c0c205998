//! Buffers a multipart submission into an upload plus text fields.

use std::collections::BTreeMap;
use std::io::Cursor;

use axum::extract::Multipart;
use axum::http::StatusCode;
use tracing::warn;

use crate::api_error::GatewayApiError;
use crate::endpoints::FILE_FIELD;

#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    file_name: Option<String>,
    file: Option<Vec<u8>>,
    fields: BTreeMap<String, String>,
}

impl UploadForm {
    /// Reads every part of `multipart`.
    ///
    /// A file body that fails mid-read leaves `file` unset so the orchestrator
    /// can fall back to the copy stored in the session directory. Reading
    /// stops there since the stream cannot be resumed.
    pub(crate) async fn collect(mut multipart: Multipart) -> Result<Self, GatewayApiError> {
        let mut form = Self::default();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(error) if error.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                    return Err(GatewayApiError::payload_too_large(error.body_text()));
                }
                Err(error) => {
                    return Err(GatewayApiError::bad_request(
                        "invalid_multipart",
                        error.body_text(),
                    ));
                }
            };
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == FILE_FIELD {
                form.file_name = field.file_name().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => form.file = Some(bytes.to_vec()),
                    Err(error) if error.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                        return Err(GatewayApiError::payload_too_large(error.body_text()));
                    }
                    Err(error) => {
                        warn!(error = %error, "upload body unreadable; using stored session copy");
                        break;
                    }
                }
                continue;
            }

            let value = field.text().await.map_err(|error| {
                GatewayApiError::bad_request(
                    "invalid_multipart",
                    format!("field '{name}' could not be read: {}", error.body_text()),
                )
            })?;
            form.fields.insert(name, value);
        }
        Ok(form)
    }

    pub(crate) fn required(&self, name: &str) -> Result<&str, GatewayApiError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| {
                GatewayApiError::bad_request(
                    "validation_error",
                    format!("missing form field '{name}'"),
                )
            })
    }

    pub(crate) fn file_name(&self) -> Result<&str, GatewayApiError> {
        self.file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                GatewayApiError::bad_request(
                    "validation_error",
                    format!("form field '{FILE_FIELD}' must be a named file upload"),
                )
            })
    }

    /// Hands the buffered body to the orchestrator as an async reader.
    pub(crate) fn take_upload(&mut self) -> Option<Cursor<Vec<u8>>> {
        self.file.take().map(Cursor::new)
    }
}
