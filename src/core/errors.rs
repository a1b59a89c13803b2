// src/core/errors.rs

//! The crate-wide error type. Every engine returns `AppError` from its
//! fallible operations; handlers turn it into a JSON body with `IntoResponse`
//! rather than ever panicking or letting an error cross a handler uncaught.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Client asked to enter the critical section while already inside it.
    #[error("already in the critical section")]
    AlreadyInCs,

    /// Client asked to release the critical section while not holding it.
    #[error("not in the critical section")]
    NotInCs,

    /// A peer id was referenced that isn't in the peer table.
    #[error("unknown peer id {0}")]
    UnknownPeer(u64),

    /// An outbound call to a peer failed: timeout, refused, DNS failure.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::PeerUnreachable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::AlreadyInCs | AppError::NotInCs => StatusCode::CONFLICT,
            AppError::UnknownPeer(_) => StatusCode::BAD_REQUEST,
            AppError::PeerUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"status": "error", "error": self.to_string()}))).into_response()
    }
}
