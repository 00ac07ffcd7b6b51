use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable error category surfaced to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileTooLarge,
    InvalidFormat,
    ProcessingFailed,
    NetworkError,
    AuthenticationError,
    QuotaExceeded,
    NotFound,
    Forbidden,
    ValidationError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileTooLarge => "file_too_large",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Suggested next step shown next to the error message.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::FileTooLarge => {
                "Compress the document or split it into smaller files and upload again."
            }
            ErrorKind::InvalidFormat => {
                "Upload a PDF or an image (PNG, JPEG, TIFF) of the invoice."
            }
            ErrorKind::ProcessingFailed => {
                "Check that the document is a readable invoice and retry; scanned PDFs work best as images."
            }
            ErrorKind::NetworkError => {
                "The extraction service could not be reached. Retry in a few minutes."
            }
            ErrorKind::AuthenticationError => {
                "Check your API token or the configured provider API keys."
            }
            ErrorKind::QuotaExceeded => {
                "Your monthly invoice quota is used up. Upgrade the plan or wait for the next month."
            }
            ErrorKind::NotFound => "Check the identifier and try again.",
            ErrorKind::Forbidden => "Ask an administrator of your organization for access.",
            ErrorKind::ValidationError => "Correct the highlighted fields and save again.",
            ErrorKind::InternalError => "Retry later. If the problem persists contact support.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("File too large: {filename} ({size} bytes, max {max} bytes)")]
    FileTooLarge { filename: String, size: u64, max: u64 },

    #[error("Invalid file format: {filename}: {reason}")]
    InvalidFormat { filename: String, reason: String },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Quota exceeded: {used}/{limit} invoices this month")]
    QuotaExceeded { used: u64, limit: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntakeError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            IntakeError::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            IntakeError::ProcessingFailed(_) => ErrorKind::ProcessingFailed,
            IntakeError::Network(_) => ErrorKind::NetworkError,
            IntakeError::Authentication(_) => ErrorKind::AuthenticationError,
            IntakeError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            IntakeError::NotFound(_) => ErrorKind::NotFound,
            IntakeError::Forbidden(_) => ErrorKind::Forbidden,
            IntakeError::Validation(_) => ErrorKind::ValidationError,
            IntakeError::Database(_) | IntakeError::Io(_) | IntakeError::Internal(_) => {
                ErrorKind::InternalError
            }
        }
    }

    pub fn remediation(&self) -> &'static str {
        self.kind().remediation()
    }

    pub fn lock_poisoned(what: &str) -> Self {
        IntakeError::Internal(format!("{what} lock poisoned"))
    }
}

impl From<anyhow::Error> for IntakeError {
    fn from(err: anyhow::Error) -> Self {
        IntakeError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        IntakeError::Internal(format!("JSON: {err}"))
    }
}

pub type IntakeResult<T> = Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_wire_names() {
        let err = IntakeError::FileTooLarge {
            filename: "a.pdf".into(),
            size: 10,
            max: 5,
        };
        assert_eq!(err.kind().as_str(), "file_too_large");
        assert_eq!(
            serde_json::to_value(ErrorKind::AuthenticationError).unwrap(),
            "authentication_error"
        );
        assert_eq!(
            IntakeError::QuotaExceeded { used: 5, limit: 5 }.kind(),
            ErrorKind::QuotaExceeded
        );
    }

    #[test]
    fn storage_errors_are_internal() {
        let err: IntakeError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(!err.remediation().is_empty());
    }
}
