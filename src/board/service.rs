use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::service::{validate_display_name, AuthService, Session};
use crate::core::error::{AppError, AppResult};
use crate::core::types::{
    Board, CreateBoardRequest, JoinBoardRequest, Photo, Role, Student, UploadPhotoRequest, User,
};
use crate::crypto::service::CryptoService;
use crate::storage::database::Database;
use crate::storage::media::MediaStore;
use crate::storage::repositories::{BoardRepository, PhotoRepository, StoredPhoto};

const MAX_TITLE_LEN: usize = 120;
const MAX_CAPTION_LEN: usize = 280;
const JOIN_CODE_ATTEMPTS: usize = 5;

pub struct BoardService {
    boards: BoardRepository,
    photos: PhotoRepository,
    crypto: Arc<CryptoService>,
    auth: Arc<AuthService>,
    media: Arc<MediaStore>,
    base_url: String,
    max_upload_bytes: usize,
}

/// Result of a student joining a board through its QR code.
#[derive(Debug, Clone)]
pub struct JoinedBoard {
    pub board: Board,
    pub student: Student,
    pub session: Session,
}

fn image_extension(content_type: &str) -> AppResult<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/heic" => Ok("heic"),
        other => Err(AppError::InvalidRequest(format!(
            "Unsupported image type: {}",
            other
        ))),
    }
}

/// Accepts plain base64 or a `data:<type>;base64,` URL.
fn decode_image(encoded: &str) -> AppResult<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid image data: {}", e)))
}

impl BoardService {
    pub fn new(
        db: Arc<Database>,
        crypto: Arc<CryptoService>,
        auth: Arc<AuthService>,
        media: Arc<MediaStore>,
        base_url: &str,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            boards: BoardRepository::new(Arc::clone(&db)),
            photos: PhotoRepository::new(db),
            crypto,
            auth,
            media,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_upload_bytes,
        }
    }

    /// URL encoded into the board's QR code
    pub fn join_url(&self, board: &Board) -> String {
        format!("{}/join/{}", self.base_url, board.join_code)
    }

    fn can_manage(actor: &User, board: &Board) -> bool {
        actor.is_admin() || board.owner_id == actor.id
    }

    fn ensure_manage(actor: &User, board: &Board) -> AppResult<()> {
        if Self::can_manage(actor, board) {
            Ok(())
        } else {
            Err(AppError::Authorization("Not allowed to manage this board".to_string()))
        }
    }

    async fn find_board(&self, board_id: Uuid) -> AppResult<Board> {
        self.boards
            .find_by_id(board_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Board not found".to_string()))
    }

    /// Board visible to the actor: managers, plus students who joined it.
    async fn visible_board(&self, actor: &User, board_id: Uuid) -> AppResult<Board> {
        let board = self.find_board(board_id).await?;
        if Self::can_manage(actor, &board)
            || self.boards.find_student(board.id, actor.id).await?.is_some()
        {
            Ok(board)
        } else {
            Err(AppError::Authorization("Not a member of this board".to_string()))
        }
    }

    async fn unique_join_code(&self) -> AppResult<String> {
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let code = self.crypto.generate_join_code()?;
            if !self.boards.join_code_exists(&code).await? {
                return Ok(code);
            }
        }
        Err(AppError::Internal("Could not allocate a join code".to_string()))
    }

    fn to_photo(&self, stored: StoredPhoto) -> Photo {
        Photo {
            id: stored.id,
            board_id: stored.board_id,
            student_id: stored.student_id,
            image_url: self.media.public_url(&stored.image_path),
            content_type: stored.content_type,
            caption: stored.caption,
            created_at: stored.created_at,
        }
    }

    /// Create a new board
    pub async fn create_board(&self, owner: &User, request: CreateBoardRequest) -> AppResult<Board> {
        if owner.role == Role::Student {
            return Err(AppError::Authorization("Students cannot create boards".to_string()));
        }

        let title = request.title.trim().to_string();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
            return Err(AppError::InvalidRequest(format!(
                "Title must be 1 to {} characters",
                MAX_TITLE_LEN
            )));
        }
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let board = Board {
            id: Uuid::new_v4(),
            title,
            description,
            join_code: self.unique_join_code().await?,
            owner_id: owner.id,
            is_active: true,
            created_at: Utc::now(),
        };
        self.boards.insert(&board).await?;

        info!("Board {} created by {}", board.id, owner.id);
        Ok(board)
    }

    pub async fn get_board(&self, actor: &User, board_id: Uuid) -> AppResult<Board> {
        self.visible_board(actor, board_id).await
    }

    /// Admins see every board, teachers their own, students the ones they joined
    pub async fn list_boards(&self, actor: &User) -> AppResult<Vec<Board>> {
        match actor.role {
            Role::Admin => self.boards.list_all().await,
            Role::Teacher => self.boards.list_by_owner(actor.id).await,
            Role::Student => self.boards.list_joined(actor.id).await,
        }
    }

    /// Enable or disable joins and uploads
    pub async fn set_board_active(&self, actor: &User, board_id: Uuid, is_active: bool) -> AppResult<Board> {
        let mut board = self.find_board(board_id).await?;
        Self::ensure_manage(actor, &board)?;

        self.boards.set_active(board.id, is_active).await?;
        board.is_active = is_active;

        info!("Board {} active = {}", board.id, is_active);
        Ok(board)
    }

    pub async fn delete_board(&self, actor: &User, board_id: Uuid) -> AppResult<()> {
        let board = self.find_board(board_id).await?;
        Self::ensure_manage(actor, &board)?;

        let paths = self.photos.image_paths_for_board(board.id).await?;
        self.boards.delete(board.id).await?;
        self.delete_images(&paths).await;

        info!("Board {} deleted by {}", board.id, actor.id);
        Ok(())
    }

    /// Join a board with the code from its QR code
    pub async fn join_board(&self, request: JoinBoardRequest) -> AppResult<JoinedBoard> {
        let join_code = request.join_code.trim().to_uppercase();
        let display_name = validate_display_name(&request.display_name)?;

        let board = self
            .boards
            .find_by_join_code(&join_code)
            .await?
            .ok_or_else(|| AppError::NotFound("No board with this join code".to_string()))?;

        if !board.is_active {
            return Err(AppError::FailedPrecondition("Board is not accepting new students".to_string()));
        }

        let user = self.auth.create_student(&display_name).await?;
        let student = Student {
            id: Uuid::new_v4(),
            board_id: board.id,
            user_id: user.id,
            display_name,
            joined_at: Utc::now(),
        };
        self.boards.insert_student(&student).await?;
        let session = self.auth.create_session(user.id).await?;

        info!("Student {} joined board {}", student.id, board.id);
        Ok(JoinedBoard {
            board,
            student,
            session,
        })
    }

    pub async fn list_students(&self, actor: &User, board_id: Uuid) -> AppResult<Vec<Student>> {
        let board = self.find_board(board_id).await?;
        Self::ensure_manage(actor, &board)?;
        self.boards.list_students(board.id).await
    }

    /// Remove a student and their photos from a board
    pub async fn remove_student(&self, actor: &User, board_id: Uuid, student_id: Uuid) -> AppResult<()> {
        let board = self.find_board(board_id).await?;
        Self::ensure_manage(actor, &board)?;

        let student = self
            .boards
            .find_student_by_id(student_id)
            .await?
            .filter(|student| student.board_id == board.id)
            .ok_or_else(|| AppError::NotFound("Student not found".to_string()))?;

        let paths = self.photos.image_paths_for_student(student.id).await?;
        self.boards.delete_student(student.id).await?;
        self.delete_images(&paths).await;

        info!("Student {} removed from board {}", student.id, board.id);
        Ok(())
    }

    /// Upload a photo to a board the actor has joined
    pub async fn upload_photo(&self, actor: &User, board_id: Uuid, request: UploadPhotoRequest) -> AppResult<Photo> {
        let board = self.find_board(board_id).await?;
        let student = self
            .boards
            .find_student(board.id, actor.id)
            .await?
            .ok_or_else(|| AppError::Authorization("Only students of this board can upload".to_string()))?;

        if !board.is_active {
            return Err(AppError::FailedPrecondition("Board is not accepting uploads".to_string()));
        }

        let extension = image_extension(&request.content_type)?;
        let bytes = decode_image(&request.image)?;
        if bytes.is_empty() {
            return Err(AppError::InvalidRequest("Image is empty".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(AppError::InvalidRequest(format!(
                "Image exceeds {} bytes",
                self.max_upload_bytes
            )));
        }

        let caption = request
            .caption
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if caption.as_ref().map_or(false, |c| c.chars().count() > MAX_CAPTION_LEN) {
            return Err(AppError::InvalidRequest(format!(
                "Caption must be at most {} characters",
                MAX_CAPTION_LEN
            )));
        }

        let image_path = self.media.save(board.id, &bytes, extension).await?;
        let stored = StoredPhoto {
            id: Uuid::new_v4(),
            board_id: board.id,
            student_id: student.id,
            image_path,
            content_type: request.content_type,
            caption,
            created_at: Utc::now(),
        };

        if let Err(e) = self.photos.insert(&stored).await {
            self.delete_images(std::slice::from_ref(&stored.image_path)).await;
            return Err(e);
        }

        info!("Photo {} uploaded to board {}", stored.id, board.id);
        Ok(self.to_photo(stored))
    }

    /// Newest photos first
    pub async fn list_photos(
        &self,
        actor: &User,
        board_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<Photo>> {
        let board = self.visible_board(actor, board_id).await?;
        let limit = limit.unwrap_or(50).clamp(1, 100);
        let offset = offset.unwrap_or(0).max(0);

        let photos = self.photos.list_by_board(board.id, limit, offset).await?;
        Ok(photos.into_iter().map(|p| self.to_photo(p)).collect())
    }

    /// Board managers can delete any photo, students only their own
    pub async fn delete_photo(&self, actor: &User, photo_id: Uuid) -> AppResult<()> {
        let photo = self
            .photos
            .find(photo_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;
        let board = self.find_board(photo.board_id).await?;

        let is_uploader = self
            .boards
            .find_student(board.id, actor.id)
            .await?
            .map_or(false, |student| student.id == photo.student_id);
        if !is_uploader {
            Self::ensure_manage(actor, &board)?;
        }

        self.photos.delete(photo.id).await?;
        self.delete_images(std::slice::from_ref(&photo.image_path)).await;
        Ok(())
    }

    /// Delete image files belonging to a user before the account is removed
    pub async fn remove_user_content(&self, user_id: Uuid) -> AppResult<()> {
        let mut paths = Vec::new();
        for board in self.boards.list_by_owner(user_id).await? {
            paths.extend(self.photos.image_paths_for_board(board.id).await?);
        }
        for board in self.boards.list_joined(user_id).await? {
            if let Some(student) = self.boards.find_student(board.id, user_id).await? {
                paths.extend(self.photos.image_paths_for_student(student.id).await?);
            }
        }
        self.delete_images(&paths).await;
        Ok(())
    }

    async fn delete_images(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.media.delete(path).await {
                warn!("Failed to delete image {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::tests::{fixture as auth_fixture, Fixture as AuthFixture};
    use crate::core::config::Config;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    struct Fixture {
        auth: AuthFixture,
        boards: BoardService,
        media: Arc<MediaStore>,
    }

    async fn fixture() -> Fixture {
        let config = Config::for_tests();
        let auth = auth_fixture().await;
        let media = Arc::new(MediaStore::new(&config.media, &config.server.base_url));
        let auth_service = Arc::new(AuthService::new(
            Arc::clone(&auth.db),
            Arc::new(CryptoService::new()),
            Arc::clone(&auth.verification),
            config.security,
        ));
        let boards = BoardService::new(
            Arc::clone(&auth.db),
            Arc::new(CryptoService::new()),
            auth_service,
            Arc::clone(&media),
            &config.server.base_url,
            config.media.max_upload_bytes,
        );
        Fixture { auth, boards, media }
    }

    fn upload(caption: Option<&str>) -> UploadPhotoRequest {
        UploadPhotoRequest {
            image: general_purpose::STANDARD.encode(PNG),
            content_type: "image/png".to_string(),
            caption: caption.map(str::to_string),
        }
    }

    async fn board_for(f: &Fixture, teacher: &User) -> Board {
        f.boards
            .create_board(
                teacher,
                CreateBoardRequest {
                    title: " Spring Art ".to_string(),
                    description: Some("  ".to_string()),
                },
            )
            .await
            .unwrap()
    }

    async fn join(f: &Fixture, board: &Board, name: &str) -> JoinedBoard {
        f.boards
            .join_board(JoinBoardRequest {
                join_code: board.join_code.to_lowercase(),
                display_name: name.to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn teacher_creates_board_with_join_url() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;

        assert_eq!(board.title, "Spring Art");
        assert!(board.description.is_none());
        assert!(board.is_active);
        assert_eq!(
            f.boards.join_url(&board),
            format!("http://wall.test/join/{}", board.join_code)
        );
        assert_eq!(f.boards.list_boards(&teacher).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn students_join_upload_and_see_the_wall() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;

        let joined = join(&f, &board, "Arnold").await;
        let student_user = f.auth.auth.validate_session(&joined.session.token).await.unwrap();
        assert_eq!(student_user.role, Role::Student);

        let photo = f
            .boards
            .upload_photo(&student_user, board.id, upload(Some("My volcano")))
            .await
            .unwrap();
        assert!(photo.image_url.starts_with("http://wall.test/media/"));
        assert_eq!(photo.student_id, joined.student.id);

        let wall = f.boards.list_photos(&student_user, board.id, None, None).await.unwrap();
        assert_eq!(wall.len(), 1);
        assert_eq!(wall[0].caption.as_deref(), Some("My volcano"));

        let joined_boards = f.boards.list_boards(&student_user).await.unwrap();
        assert_eq!(joined_boards[0].id, board.id);
        assert_eq!(f.boards.list_students(&teacher, board.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_or_inactive_boards_reject_joins_and_uploads() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;
        let joined = join(&f, &board, "Wanda").await;
        let student_user = f.auth.auth.validate_session(&joined.session.token).await.unwrap();

        let err = f
            .boards
            .join_board(JoinBoardRequest {
                join_code: "ZZZZZZZZ".to_string(),
                display_name: "Carlos".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");

        let board = f
            .boards
            .set_board_active(&teacher, board.id, false)
            .await
            .unwrap();
        assert!(!board.is_active);

        let err = f
            .boards
            .join_board(JoinBoardRequest {
                join_code: board.join_code.clone(),
                display_name: "Carlos".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "failed-precondition");

        let err = f
            .boards
            .upload_photo(&student_user, board.id, upload(None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "failed-precondition");
    }

    #[tokio::test]
    async fn uploads_are_validated() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;
        let joined = join(&f, &board, "Keesha").await;
        let student_user = f.auth.auth.validate_session(&joined.session.token).await.unwrap();

        let err = f.boards.upload_photo(&teacher, board.id, upload(None)).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        let mut gif = upload(None);
        gif.content_type = "image/gif".to_string();
        let err = f.boards.upload_photo(&student_user, board.id, gif).await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        let mut huge = upload(None);
        huge.image = general_purpose::STANDARD.encode(vec![0u8; 2048]);
        let err = f.boards.upload_photo(&student_user, board.id, huge).await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        let mut data_url = upload(None);
        data_url.image = format!("data:image/png;base64,{}", data_url.image);
        f.boards.upload_photo(&student_user, board.id, data_url).await.unwrap();
    }

    #[tokio::test]
    async fn photo_deletion_rules() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let other_teacher = f.auth.register("other@school.test").await;
        let board = board_for(&f, &teacher).await;

        let a = join(&f, &board, "Ralphie").await;
        let b = join(&f, &board, "Tim").await;
        let user_a = f.auth.auth.validate_session(&a.session.token).await.unwrap();
        let user_b = f.auth.auth.validate_session(&b.session.token).await.unwrap();

        let photo = f.boards.upload_photo(&user_a, board.id, upload(None)).await.unwrap();

        let err = f.boards.delete_photo(&user_b, photo.id).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");
        let err = f.boards.delete_photo(&other_teacher, photo.id).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        f.boards.delete_photo(&user_a, photo.id).await.unwrap();
        let err = f.boards.delete_photo(&teacher, photo.id).await.unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn deleting_a_board_removes_its_images() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;
        let joined = join(&f, &board, "Phoebe").await;
        let student_user = f.auth.auth.validate_session(&joined.session.token).await.unwrap();
        f.boards.upload_photo(&student_user, board.id, upload(None)).await.unwrap();

        let board_dir = f.media.root().join(board.id.to_string());
        assert_eq!(std::fs::read_dir(&board_dir).unwrap().count(), 1);

        let err = f.boards.delete_board(&student_user, board.id).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        f.boards.delete_board(&teacher, board.id).await.unwrap();
        assert_eq!(std::fs::read_dir(&board_dir).unwrap().count(), 0);
        assert_eq!(f.boards.get_board(&teacher, board.id).await.unwrap_err().code(), "not-found");
    }

    #[tokio::test]
    async fn outsiders_cannot_view_a_board() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let admin = f.auth.register("principal@school.test").await;
        let stranger = f.auth.register("stranger@school.test").await;
        let board = board_for(&f, &teacher).await;

        assert!(f.boards.get_board(&admin, board.id).await.is_ok());
        assert_eq!(f.boards.list_boards(&admin).await.unwrap().len(), 1);
        let err = f.boards.get_board(&stranger, board.id).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");
        let err = f.boards.list_students(&stranger, board.id).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");
    }

    #[tokio::test]
    async fn teacher_removes_a_student() {
        let f = fixture().await;
        let teacher = f.auth.register("teacher@school.test").await;
        let board = board_for(&f, &teacher).await;
        let joined = join(&f, &board, "Dorothy Ann").await;

        f.boards
            .remove_student(&teacher, board.id, joined.student.id)
            .await
            .unwrap();
        assert!(f.boards.list_students(&teacher, board.id).await.unwrap().is_empty());
        let err = f
            .boards
            .remove_student(&teacher, board.id, joined.student.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }
}
