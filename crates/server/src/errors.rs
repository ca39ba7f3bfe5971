use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cityrag::orchestrator::OrchestratorError;
use cityrag::PromptError;
use serde_json::json;
use tracing::error;

/// A custom error type for the server application.
///
/// This enum encapsulates the different kinds of errors that can occur
/// within the server, allowing them to be converted into appropriate HTTP
/// responses.
pub enum AppError {
    /// Errors from direct AI provider interactions.
    Prompt(PromptError),
    /// Errors from the query orchestration pipeline.
    Orchestrator(OrchestratorError),
    /// Generic internal server errors.
    Internal(anyhow::Error),
}

impl From<PromptError> for AppError {
    fn from(err: PromptError) -> Self {
        AppError::Prompt(err)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        AppError::Orchestrator(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

fn prompt_error_response(err: PromptError) -> (StatusCode, String) {
    match err {
        PromptError::MissingApiKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server is not configured correctly.".to_string(),
        ),
        PromptError::AiRequest(e) => (
            StatusCode::BAD_GATEWAY,
            format!("Request to AI provider failed: {e}"),
        ),
        PromptError::AiDeserialization(e) => (
            StatusCode::BAD_GATEWAY,
            format!("Failed to deserialize AI provider response: {e}"),
        ),
        PromptError::AiApi(e) => (StatusCode::BAD_GATEWAY, format!("AI provider error: {e}")),
        PromptError::ReqwestClientBuild(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to build HTTP client: {e}"),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_message) = match self {
            AppError::Prompt(err) => {
                error!("PromptError: {:?}", err);
                prompt_error_response(err)
            }
            AppError::Orchestrator(err) => {
                error!("OrchestratorError: {:?}", err);
                match err {
                    OrchestratorError::Llm(e) => prompt_error_response(e),
                    OrchestratorError::Store(e) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Knowledge store error: {e}"),
                    ),
                }
            }
            AppError::Internal(err) => {
                error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status_code, body).into_response()
    }
}
