//! HTTP request/response DTOs shared by the three `axum` binaries. Route
//! bodies stay thin: decode one of these, call into the library, encode the
//! response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::mosaic::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct MosaicRequest {
    pub ip: String,
    pub tile_width: u32,
    /// Base64-encoded source image.
    pub original: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MosaicResponse {
    pub error: bool,
    /// Base64-encoded PNG.
    pub mosaic: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub ip: String,
    pub n: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub error: bool,
    pub attempted: usize,
    pub published: usize,
    pub inserted: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: bool,
    pub message: String,
}

/// Maps an `AppError` onto the generic `{ error: true, message }` envelope,
/// `InvalidRequest` as a 4xx and everything else as a 5xx — matching the
/// propagation policy that keeps operational failures (store, bus, source
/// HTTP) out of the client-facing error category.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorEnvelope {
            error: true,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
