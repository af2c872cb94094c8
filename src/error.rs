use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("unknown root: {0}")]
    RootNotFound(String),

    #[error("not found: {0}")]
    ResourceNotFound(String),

    #[error("path is outside its root directory")]
    PathEscape,

    #[error("walk failed at {path}: {source}")]
    Walk {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match &self {
            ServeError::RootNotFound(_) | ServeError::ResourceNotFound(_) => {
                (StatusCode::NOT_FOUND, "404 Not Found").into_response()
            }
            // Never echo the resolved path back to the client.
            ServeError::PathEscape => {
                (StatusCode::FORBIDDEN, "no funny business").into_response()
            }
            ServeError::Walk { .. } | ServeError::Io(_) => {
                error!("request failed: {self}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
