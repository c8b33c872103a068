use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        // server-side causes are logged, never returned to the caller
        let (status, error_message) = match self {
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Forbidden(err) => (StatusCode::FORBIDDEN, err.to_string()),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string()),
            AppError::InternalError(err) => {
                tracing::error!(error = %format!("{:#}", err), "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error.".to_string(),
                )
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %format!("{:#}", err), "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn forbidden_renders_message_verbatim() {
        let response = AppError::Forbidden(anyhow::anyhow!("Insufficient credits.")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Insufficient credits.");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn internal_error_hides_cause_behind_generic_message() {
        let response =
            AppError::InternalError(anyhow::anyhow!("upstream timed out")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error.");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn internal_error_body_omits_cause_chain() {
        let cause = anyhow::anyhow!("https://rpc.example/v3/secret-key unreachable")
            .context("Failed to read credit balance");
        let response = AppError::InternalError(cause).into_response();

        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({"error": "Internal server error."}));
    }
}
