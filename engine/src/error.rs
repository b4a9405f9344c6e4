use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::audio::EngineError;

/// Errors surfaced by the catalog and the playback orchestrator.
///
/// Persistence write failures never show up here: the store logs them and
/// keeps serving the in-memory state.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Playlist, song or file is missing.
    #[error("{0}")]
    NotFound(String),

    /// Bad parameter range, duplicate names, invalid transition mode.
    #[error("{0}")]
    Validation(String),

    /// A fade or deferred playlist transition is already queued.
    #[error("{0}")]
    TransitionPending(String),

    /// The audio engine failed. The session has been reset by the time the
    /// caller sees this.
    #[error("audio engine error: {0}")]
    Engine(#[from] EngineError),

    /// Renaming a folder or file on disk failed.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PlayerError::NotFound(_) => StatusCode::NOT_FOUND,
            PlayerError::Validation(_) => StatusCode::BAD_REQUEST,
            PlayerError::TransitionPending(_) => StatusCode::CONFLICT,
            PlayerError::Engine(_) | PlayerError::Filesystem(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for PlayerError {
    fn from(rejection: JsonRejection) -> Self {
        PlayerError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for PlayerError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::warn!("request failed: {self}");
        }
        (code, Json(json!({ "status": "error", "message": self.to_string() }))).into_response()
    }
}
