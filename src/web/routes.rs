use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::core::app::AppState;
use crate::storage::media::MEDIA_ROUTE;
use crate::web::handlers::{auth, board, config, user, verification};
use crate::web::middleware::{admin_middleware, auth_middleware};

/// Room for base64 overhead and the JSON envelope around an upload.
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes / 3 * 4 + 64 * 1024
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public = Router::new()
        .route("/api/verification/send", post(verification::send_code))
        .route("/api/verification/verify", post(verification::verify_code))
        .route("/api/config", get(config::public_config))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/join", post(board::join_board));

    // Protected routes (auth required)
    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/boards", get(board::list_boards).post(board::create_board))
        .route("/api/boards/:id", get(board::get_board).delete(board::delete_board))
        .route("/api/boards/:id/active", put(board::set_board_active))
        .route("/api/boards/:id/students", get(board::list_students))
        .route("/api/boards/:id/students/:student_id", delete(board::remove_student))
        .route("/api/boards/:id/photos", get(board::list_photos).post(board::upload_photo))
        .route("/api/photos/:id", delete(board::delete_photo))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let admin = Router::new()
        .route("/api/users", get(user::list_users))
        .route("/api/users/:id", get(user::get_user).delete(user::delete_user))
        .route_layer(from_fn(admin_middleware))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        // Uploaded images
        .nest_service(MEDIA_ROUTE, ServeDir::new(state.media.root()))
        // Health check
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit(state.config.media.max_upload_bytes)))
        // Add CORS middleware
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "DATABASE UNAVAILABLE")
        }
    }
}
