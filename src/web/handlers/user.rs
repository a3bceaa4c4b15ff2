use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::error::AppError;
use crate::core::types::User;
use crate::web::handlers::{error_response, parse_id, ApiError, ApiResult};

pub async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Vec<User>> {
    state
        .auth_service
        .list_users()
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<User> {
    let user_id = parse_id(&user_id, "user")?;
    state
        .auth_service
        .get_user(user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<User>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = parse_id(&user_id, "user")?;
    let target = state
        .auth_service
        .get_user(user_id)
        .await
        .map_err(error_response)?;
    if target.id == admin.id {
        // Checked before any images are removed.
        return Err(error_response(AppError::InvalidRequest(
            "Cannot delete your own account".to_string(),
        )));
    }

    state
        .board_service
        .remove_user_content(target.id)
        .await
        .map_err(error_response)?;
    state
        .auth_service
        .delete_user(&admin, target.id)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}
