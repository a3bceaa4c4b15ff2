use axum::{extract::State, http::StatusCode, response::Json, Extension};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::types::{LoginRequest, RegisterRequest, User};
use crate::web::handlers::{error_response, ApiError, ApiResult};
use crate::web::middleware::SessionToken;

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<AuthResponse> {
    let user = state
        .auth_service
        .register(request)
        .await
        .map_err(error_response)?;
    let session = state
        .auth_service
        .create_session(user.id)
        .await
        .map_err(error_response)?;

    Ok(Json(AuthResponse {
        user,
        token: session.token,
        expires_at: session.expires_at,
    }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    let (user, session) = state
        .auth_service
        .login(request)
        .await
        .map_err(error_response)?;

    Ok(Json(AuthResponse {
        user,
        token: session.token,
        expires_at: session.expires_at,
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<StatusCode, ApiError> {
    state
        .auth_service
        .logout(&token)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
