//! `POST /api/handins`, the entry point the web tier calls once it has
//! authenticated the user and received the upload.

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use super::response::{ApiResponse, Empty};
use crate::error::IntakeError;
use crate::ids::HandinId;
use crate::intake::SubmitRequest;
use crate::languages::RawPayload;

#[derive(Debug, Serialize)]
pub struct SubmitData {
    pub handin_id: HandinId,
}

#[derive(Debug, Default)]
struct SubmitForm {
    owner_id: Option<i64>,
    assignment: Option<String>,
    language: Option<String>,
    deadline_hint: Option<DateTime<Utc>>,
    file: Option<RawPayload>,
}

impl SubmitForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, String> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("Invalid form data: {e}"))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| format!("Invalid file upload: {e}"))?;
                    form.file = Some(RawPayload::new(filename, bytes.to_vec()));
                }
                "owner_id" | "assignment" | "language" | "deadline_hint" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| format!("Invalid field {name}: {e}"))?;
                    form.set(&name, text.trim())?;
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "owner_id" => {
                let id = value
                    .parse()
                    .map_err(|_| "owner_id must be an integer".to_string())?;
                self.owner_id = Some(id);
            }
            "assignment" => self.assignment = Some(value.to_string()),
            "language" => self.language = Some(value.to_string()),
            "deadline_hint" if !value.is_empty() => {
                let hint = DateTime::parse_from_rfc3339(value)
                    .map_err(|_| "deadline_hint must be an RFC 3339 timestamp".to_string())?;
                self.deadline_hint = Some(hint.with_timezone(&Utc));
            }
            _ => {}
        }
        Ok(())
    }

    fn into_request(self) -> Result<SubmitRequest, String> {
        let owner_id = self.owner_id.ok_or("owner_id is required")?;
        let assignment = self.assignment.ok_or("assignment is required")?;
        let language = self.language.ok_or("language is required")?;
        let file = self.file.ok_or("No file provided")?;

        let req = SubmitRequest::new(owner_id, assignment, language, file);
        Ok(match self.deadline_hint {
            Some(hint) => req.with_deadline_hint(hint),
            None => req,
        })
    }
}

fn status_for(err: &IntakeError) -> StatusCode {
    match err {
        IntakeError::AssignmentNotFound(_) => StatusCode::NOT_FOUND,
        IntakeError::SubmissionClosed { .. } => StatusCode::FORBIDDEN,
        IntakeError::UnsupportedLanguage { .. } => StatusCode::BAD_REQUEST,
        IntakeError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IntakeError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<Empty>::error(message))).into_response()
}

/// POST /api/handins
///
/// ### Multipart Body (form-data)
/// - `owner_id` (integer, required)
/// - `assignment` (slug or uuid, required)
/// - `language` (handler key, required)
/// - `deadline_hint` (RFC 3339, optional, display only)
/// - `file` (the upload, required)
///
/// ### Responses
/// - `201 Created` with `{ "handin_id": "..." }`
/// - `400 Bad Request` (malformed form, or language not accepted)
/// - `403 Forbidden` (submissions closed)
/// - `404 Not Found` (unknown assignment)
/// - `422 Unprocessable Entity` (upload rejected by the language handler)
/// - `503 Service Unavailable` (not stored, retry)
pub async fn submit_handin(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let Some(intake) = state.intake.as_ref() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Submissions are not enabled");
    };

    let req = match SubmitForm::read(&mut multipart)
        .await
        .and_then(SubmitForm::into_request)
    {
        Ok(req) => req,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    match intake.submit(req).await {
        Ok(handin_id) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(SubmitData { handin_id }, "Submission accepted")),
        )
            .into_response(),
        Err(err) => error_response(status_for(&err), err.user_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::languages::ValidationError;
    use std::time::Duration;

    #[test]
    fn test_each_error_kind_has_its_own_status() {
        let cases = [
            (IntakeError::AssignmentNotFound("x".into()), StatusCode::NOT_FOUND),
            (
                IntakeError::SubmissionClosed {
                    assignment: "x".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                IntakeError::UnsupportedLanguage {
                    assignment: "x".into(),
                    language: "cobol".into(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                IntakeError::ValidationFailed(ValidationError::Empty),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                IntakeError::PersistenceFailure(PersistenceError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }

    #[test]
    fn test_form_requires_fields() {
        let mut form = SubmitForm::default();
        form.set("owner_id", "7").unwrap();
        form.set("assignment", "linked-list").unwrap();
        assert_eq!(form.set("owner_id", "seven").unwrap_err(), "owner_id must be an integer");
        assert_eq!(form.into_request().unwrap_err(), "language is required");

        let mut form = SubmitForm::default();
        form.set("owner_id", "7").unwrap();
        form.set("assignment", "linked-list").unwrap();
        form.set("language", "python").unwrap();
        form.set("deadline_hint", "2026-03-01T23:59:59Z").unwrap();
        form.file = Some(RawPayload::new("hw.zip", b"PK".to_vec()));
        let req = form.into_request().unwrap();
        assert_eq!(req.owner_id, 7);
        assert!(req.deadline_hint.is_some());
    }
}
