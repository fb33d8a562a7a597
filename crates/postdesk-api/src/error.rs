//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use postdesk_firestore::VideoError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{detail}")]
    Conflict {
        detail: String,
        /// Machine-readable discriminator the dashboard switches on.
        code: &'static str,
    },

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] postdesk_firestore::FirestoreError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Firestore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::Conflict { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(err: VideoError) -> Self {
        match err {
            VideoError::InvalidArgument { .. }
            | VideoError::InvalidInput { .. }
            | VideoError::InvalidUpdate
            | VideoError::Validation(_) => ApiError::BadRequest(err.to_string()),
            VideoError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            VideoError::AlreadyExists { .. } => ApiError::Conflict {
                detail: err.to_string(),
                code: "already_exists",
            },
            VideoError::AlreadyClaimed { .. } => ApiError::Conflict {
                detail: err.to_string(),
                code: "already_claimed",
            },
            VideoError::ClaimedImmutable { .. } => ApiError::Conflict {
                detail: err.to_string(),
                code: "claimed_immutable",
            },
            VideoError::Store(e) => ApiError::Firestore(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code().map(str::to_string);

        // Don't expose internal error details in production
        let detail = match &self {
            ApiError::Internal(_) | ApiError::Firestore(_) => {
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse { detail, code };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postdesk_models::ValidationError;

    fn status_of(err: VideoError) -> StatusCode {
        ApiError::from(err).status_code()
    }

    #[test]
    fn test_video_error_status_table() {
        assert_eq!(
            status_of(VideoError::InvalidInput { field: "title" }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(VideoError::InvalidArgument { field: "cursor" }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(VideoError::InvalidUpdate), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(VideoError::Validation(ValidationError::invalid_enum(
                "category", "dog"
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(VideoError::NotFound {
                project_id: "p1".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(VideoError::AlreadyExists {
                project_id: "p1".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(VideoError::AlreadyClaimed {
                project_id: "p1".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(VideoError::ClaimedImmutable {
                project_id: "p1".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(VideoError::Store(
                postdesk_firestore::FirestoreError::InvalidResponse("bad".into())
            )),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflict_codes_distinguish_claim_failures() {
        let claimed = ApiError::from(VideoError::AlreadyClaimed {
            project_id: "p1".into(),
        });
        assert_eq!(claimed.code(), Some("already_claimed"));

        let immutable = ApiError::from(VideoError::ClaimedImmutable {
            project_id: "p1".into(),
        });
        assert_eq!(immutable.code(), Some("claimed_immutable"));

        assert_eq!(ApiError::unauthorized("no").code(), None);
    }
}
