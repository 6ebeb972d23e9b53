use serde::Serialize;
use thiserror::Error;

pub type ExtractionResult<T> = Result<T, ExtractionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    BackendUnavailable,
    BackendRejected,
    UnparsableResponse,
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorKind::BackendUnavailable => "backend_unavailable",
            ExtractionErrorKind::BackendRejected => "backend_rejected",
            ExtractionErrorKind::UnparsableResponse => "unparsable_response",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("extraction backend rejected the request (status {status}): {message}")]
    BackendRejected { status: u16, message: String },
    #[error("no credential found in environment variable {0}")]
    MissingCredential(String),
    #[error("extraction response contained no JSON value")]
    UnparsableResponse { raw: String },
}

impl ExtractionError {
    pub fn kind(&self) -> ExtractionErrorKind {
        match self {
            ExtractionError::BackendUnavailable(_) | ExtractionError::MissingCredential(_) => {
                ExtractionErrorKind::BackendUnavailable
            }
            ExtractionError::BackendRejected { .. } => ExtractionErrorKind::BackendRejected,
            ExtractionError::UnparsableResponse { .. } => ExtractionErrorKind::UnparsableResponse,
        }
    }

    /// Raw backend text kept for diagnostics.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            ExtractionError::UnparsableResponse { raw } => Some(raw),
            _ => None,
        }
    }

    pub fn operator_message(&self) -> String {
        match self {
            ExtractionError::BackendUnavailable(reason) => format!(
                "The extraction service could not be reached ({reason}). Try again in a few minutes."
            ),
            ExtractionError::BackendRejected { status, message } => format!(
                "The extraction service refused the request (HTTP {status}: {message}). Check the model name, quota and credential."
            ),
            ExtractionError::MissingCredential(variable) => format!(
                "No extraction credential is configured. Export {variable} before running."
            ),
            ExtractionError::UnparsableResponse { .. } => {
                "The extraction service answered without usable JSON. Re-run the extraction; the raw answer is kept for diagnosis.".to_string()
            }
        }
    }
}
