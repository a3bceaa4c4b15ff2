use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::types::{SendVerificationRequest, VerificationResponse, VerifyCodeRequest};
use crate::web::handlers::{error_response, ApiResult};

pub async fn send_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendVerificationRequest>,
) -> ApiResult<VerificationResponse> {
    state
        .verification_service
        .send_verification_email(&request.email)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyCodeRequest>,
) -> ApiResult<VerificationResponse> {
    state
        .verification_service
        .verify_email_code(&request.email, &request.code)
        .await
        .map(Json)
        .map_err(error_response)
}
