use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("invalid input")]
    InvalidInput,

    #[error("permission denied")]
    PermissionDenied,

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    /// State that should be impossible, e.g. a malformed token inside the session store.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InvalidInput => StatusCode::BAD_REQUEST,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::AlreadyExists => StatusCode::CONFLICT,
            Error::Invariant(_)
            | Error::Config(_)
            | Error::Sqlx(_)
            | Error::Migrate(_)
            | Error::Redis(_)
            | Error::TaskJoin(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // internal details stay in the log
        let message = if status.is_server_error() {
            match &self {
                Error::Invariant(reason) => {
                    tracing::error!(reason = %reason, "internal invariant violated")
                }
                other => tracing::error!(error = %other, "request failed"),
            }
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        assert_eq!(Error::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::AlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::Invariant("bad token".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let timeout = redis::RedisError::from((redis::ErrorKind::IoError, "timed out"));
        assert_eq!(
            Error::Redis(timeout).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    async fn body_of(error: Error) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn hides_internal_details() {
        let (status, body) = body_of(Error::Invariant("secret detail".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "internal error" }));
        assert!(!body.to_string().contains("secret detail"));

        let (status, body) = body_of(Error::Sqlx(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "internal error" }));
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let (status, body) = body_of(Error::PermissionDenied).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({ "error": "permission denied" }));
    }
}
