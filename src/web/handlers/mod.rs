use axum::{http::StatusCode, response::Json};
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::AppError;

pub mod auth;
pub mod board;
pub mod config;
pub mod user;
pub mod verification;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn error_response(e: AppError) -> ApiError {
    if e.status_code() >= 500 {
        tracing::error!("Request failed: {}", e);
    }
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

pub fn parse_id(value: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value)
        .map_err(|_| error_response(AppError::InvalidRequest(format!("Invalid {} ID", what))))
}
