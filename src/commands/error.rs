use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ErrorKind, IntakeError};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorKind,
    pub message: String,
    pub remediation: &'static str,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::InvalidFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::ProcessingFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NetworkError => StatusCode::BAD_GATEWAY,
        ErrorKind::AuthenticationError => StatusCode::UNAUTHORIZED,
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::InternalError => {
                tracing::error!(error = %self, "Internal error");
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: kind,
                message,
                remediation: kind.remediation(),
            },
        };
        (status_for(kind), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_carries_code_and_remediation() {
        let response = IntakeError::QuotaExceeded { used: 10, limit: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], "quota_exceeded");
        assert!(value["error"]["remediation"].as_str().unwrap().contains("quota"));
    }

    #[tokio::test]
    async fn internal_details_stay_hidden() {
        let response = IntakeError::Internal("disk /var/secret full".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("secret"));
    }

    #[test]
    fn kinds_map_to_http_statuses() {
        assert_eq!(status_for(ErrorKind::FileTooLarge), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for(ErrorKind::InvalidFormat), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(status_for(ErrorKind::NetworkError), StatusCode::BAD_GATEWAY);
    }
}
