use sea_orm::DbErr;
use std::time::Duration;

use crate::languages::ValidationError;

/// Why a submission was not accepted.
///
/// The first four are the caller's problem and each gets its own message.
/// `PersistenceFailure` means nothing was recorded and the caller should try
/// again. Dispatch failures are never reported here: once the handin is
/// stored, the submission counts as accepted.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("submissions for {assignment} are closed")]
    SubmissionClosed { assignment: String },

    #[error("language {language} is not accepted for {assignment}")]
    UnsupportedLanguage {
        assignment: String,
        language: String,
    },

    #[error("submission rejected: {0}")]
    ValidationFailed(#[from] ValidationError),

    #[error("submission could not be stored: {0}")]
    PersistenceFailure(#[from] PersistenceError),
}

impl IntakeError {
    /// `true` for outcomes the user caused and retrying will not fix.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, Self::PersistenceFailure(_))
    }

    /// Text safe to show to the submitting user.
    pub fn user_message(&self) -> String {
        match self {
            Self::AssignmentNotFound(_) => "This assignment does not exist.".to_string(),
            Self::SubmissionClosed { .. } => {
                "The deadline for this assignment has passed.".to_string()
            }
            Self::UnsupportedLanguage { language, .. } => {
                format!("Submissions in {language} are not accepted for this assignment.")
            }
            Self::ValidationFailed(cause) => format!("Your upload was rejected: {cause}."),
            Self::PersistenceFailure(_) => {
                "Your submission was not saved. Please try again.".to_string()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("artifact storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("dispatch message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
