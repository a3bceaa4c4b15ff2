use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::error::AppError;
use crate::core::types::User;
use crate::web::handlers::error_response;

/// Bearer token of the authenticated request, kept for logout.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    let Some(token) = token else {
        return error_response(AppError::Auth("Missing bearer token".to_string())).into_response();
    };

    match state.auth_service.validate_session(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            request.extensions_mut().insert(SessionToken(token));
            next.run(request).await
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// Rejects anyone but admins; runs after `auth_middleware`.
pub async fn admin_middleware(request: Request, next: Next) -> Response {
    let is_admin = request
        .extensions()
        .get::<User>()
        .map_or(false, User::is_admin);

    if is_admin {
        next.run(request).await
    } else {
        error_response(AppError::Authorization("Admin access required".to_string())).into_response()
    }
}
