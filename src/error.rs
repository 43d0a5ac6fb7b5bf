use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailure { command: String, reason: String },

    #[error("Command blocked: {0}")]
    CommandBlocked(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Background task failed: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn spawn_failure(command: &str, reason: impl ToString) -> Self {
        AppError::SpawnFailure {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors a caller of `execute` sees as the single line of output.
    pub fn is_spawn_rejection(&self) -> bool {
        matches!(
            self,
            AppError::SpawnFailure { .. } | AppError::CommandBlocked(_) | AppError::InvalidPath(_)
        )
    }
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        tracing::error!("AppError converted to HTTP response: {:?}", self);
        let status = match self {
            AppError::InvalidInputArgument(_) | AppError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            AppError::CommandBlocked(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn variants_map_to_http_status() {
        let cases = [
            (AppError::InvalidInputArgument("empty".into()), StatusCode::BAD_REQUEST),
            (AppError::InvalidPath("/nope".into()), StatusCode::BAD_REQUEST),
            (AppError::CommandBlocked("shutdown".into()), StatusCode::FORBIDDEN),
            (AppError::spawn_failure("ls", "boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::ConfigError(anyhow::anyhow!("bad")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn only_pre_spawn_errors_are_rejections() {
        assert!(AppError::spawn_failure("ls", "boom").is_spawn_rejection());
        assert!(AppError::CommandBlocked("x".into()).is_spawn_rejection());
        assert!(!AppError::InvalidInputArgument("x".into()).is_spawn_rejection());
    }
}
