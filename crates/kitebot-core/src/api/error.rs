use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error envelope returned by Kite Connect:
/// `{"status": "error", "message": "...", "error_type": "TokenException"}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let error_type = envelope.as_ref().and_then(|e| e.error_type.clone());
        let message = envelope
            .and_then(|e| e.message)
            .map(|m| Self::truncate_body(&m))
            .unwrap_or_else(|| Self::truncate_body(body));

        match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 if error_type.as_deref() == Some("TokenException") => {
                ApiError::Unauthorized(message)
            }
            403 => ApiError::AccessDenied(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(message),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_token_exception_is_unauthorized() {
        let body = r#"{"status": "error", "message": "Incorrect `api_key` or `access_token`.", "error_type": "TokenException"}"#;
        match ApiError::from_status(StatusCode::FORBIDDEN, body) {
            ApiError::Unauthorized(msg) => assert!(msg.contains("access_token")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_forbidden_is_access_denied() {
        let body = r#"{"status": "error", "message": "Not allowed", "error_type": "PermissionException"}"#;
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, body),
            ApiError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_non_json_body_is_kept() {
        match ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down") {
            ApiError::ServerError(msg) => assert_eq!(msg, "upstream down"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let msg = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body).to_string();
        assert!(msg.contains("truncated"));
    }
}
