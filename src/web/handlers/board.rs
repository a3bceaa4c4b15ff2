use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::types::{
    Board, CreateBoardRequest, JoinBoardRequest, Photo, SetBoardActiveRequest, Student,
    UploadPhotoRequest, User,
};
use crate::web::handlers::{error_response, parse_id, ApiError, ApiResult};

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct BoardResponse {
    #[serde(flatten)]
    pub board: Board,
    pub join_url: String,
}

#[derive(Serialize)]
pub struct JoinResponse {
    pub board: BoardResponse,
    pub student: Student,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

fn with_join_url(state: &AppState, board: Board) -> BoardResponse {
    BoardResponse {
        join_url: state.board_service.join_url(&board),
        board,
    }
}

pub async fn list_boards(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> ApiResult<Vec<BoardResponse>> {
    let boards = state
        .board_service
        .list_boards(&user)
        .await
        .map_err(error_response)?;
    Ok(Json(
        boards
            .into_iter()
            .map(|board| with_join_url(&state, board))
            .collect(),
    ))
}

pub async fn create_board(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBoardRequest>,
) -> Result<(StatusCode, Json<BoardResponse>), ApiError> {
    let board = state
        .board_service
        .create_board(&user, request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(with_join_url(&state, board))))
}

pub async fn get_board(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
) -> ApiResult<BoardResponse> {
    let board_id = parse_id(&board_id, "board")?;
    let board = state
        .board_service
        .get_board(&user, board_id)
        .await
        .map_err(error_response)?;
    Ok(Json(with_join_url(&state, board)))
}

pub async fn set_board_active(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
    Json(request): Json<SetBoardActiveRequest>,
) -> ApiResult<BoardResponse> {
    let board_id = parse_id(&board_id, "board")?;
    let board = state
        .board_service
        .set_board_active(&user, board_id, request.is_active)
        .await
        .map_err(error_response)?;
    Ok(Json(with_join_url(&state, board)))
}

pub async fn delete_board(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let board_id = parse_id(&board_id, "board")?;
    state
        .board_service
        .delete_board(&user, board_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_board(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinBoardRequest>,
) -> ApiResult<JoinResponse> {
    let joined = state
        .board_service
        .join_board(request)
        .await
        .map_err(error_response)?;

    Ok(Json(JoinResponse {
        board: with_join_url(&state, joined.board),
        student: joined.student,
        token: joined.session.token,
        expires_at: joined.session.expires_at,
    }))
}

pub async fn list_students(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
) -> ApiResult<Vec<Student>> {
    let board_id = parse_id(&board_id, "board")?;
    state
        .board_service
        .list_students(&user, board_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path((board_id, student_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let board_id = parse_id(&board_id, "board")?;
    let student_id = parse_id(&student_id, "student")?;
    state
        .board_service
        .remove_student(&user, board_id, student_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_photos(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
    Query(pagination): Query<PaginationQuery>,
) -> ApiResult<Vec<Photo>> {
    let board_id = parse_id(&board_id, "board")?;
    state
        .board_service
        .list_photos(&user, board_id, pagination.limit, pagination.offset)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn upload_photo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(board_id): Path<String>,
    Json(request): Json<UploadPhotoRequest>,
) -> Result<(StatusCode, Json<Photo>), ApiError> {
    let board_id = parse_id(&board_id, "board")?;
    let photo = state
        .board_service
        .upload_photo(&user, board_id, request)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(photo)))
}

pub async fn delete_photo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(photo_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let photo_id = parse_id(&photo_id, "photo")?;
    state
        .board_service
        .delete_photo(&user, photo_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
