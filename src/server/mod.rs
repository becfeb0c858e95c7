pub mod handlers;
pub mod state;

pub use handlers::create_router;
pub use state::{AppState, SseSettings};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::cluster::CacheError;

/// Request-level failure, rendered as `500 {"error": ...}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Refresh(#[from] CacheError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
