// Table-level access for each entity. Ids are stored as hyphenated UUID
// text and timestamps as RFC 3339 text with millisecond precision, so
// string comparison in SQL orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::{AppError, AppResult};
use crate::core::types::{Board, Student, User, VerificationRecord};
use crate::storage::database::Database;

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| AppError::Internal(format!("Invalid date: {}", e)))?
        .with_timezone(&Utc))
}

fn parse_optional_timestamp(value: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

pub fn parse_uuid(value: &str, what: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| AppError::Internal(format!("Invalid {} ID: {}", what, e)))
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
    password_hash: Option<String>,
    display_name: String,
    role: String,
    created_at: String,
    last_seen: Option<String>,
}

impl UserRow {
    fn into_user(self) -> AppResult<(User, Option<String>)> {
        let user = User {
            id: parse_uuid(&self.id, "user")?,
            email: self.email,
            display_name: self.display_name,
            role: self.role.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            last_seen: parse_optional_timestamp(self.last_seen.as_deref())?,
        };
        Ok((user, self.password_hash))
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, role, created_at, last_seen";

pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, user: &User, password_hash: Option<&str>) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, role, created_at, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(format_timestamp(user.created_at))
        .bind(user.last_seen.map(format_timestamp))
        .execute(self.db.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::InvalidRequest("Email already registered".to_string())
            }
            other => AppError::Database(other),
        })?;

        Ok(())
    }

    /// Returns the user together with its password hash, if any.
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<(User, Option<String>)>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(UserRow::into_user).transpose()?.map(|(user, _)| user))
    }

    pub async fn list(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC",
            USER_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| row.into_user().map(|(user, _)| user))
            .collect()
    }

    pub async fn touch_last_seen(&self, user_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(format_timestamp(at))
            .bind(user_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at) VALUES (?, ?, ?, ?)")
            .bind(session_id.to_string())
            .bind(user_id.to_string())
            .bind(token_hash)
            .bind(format_timestamp(expires_at))
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Owner of an unexpired session.
    pub async fn find_user(&self, token_hash: &str, now: DateTime<Utc>) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.email, u.password_hash, u.display_name, u.role, u.created_at, u.last_seen
            FROM sessions s
            JOIN users u ON s.user_id = u.id
            WHERE s.token_hash = ? AND s.expires_at > ?
            "#,
        )
        .bind(token_hash)
        .bind(format_timestamp(now))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(UserRow::into_user).transpose()?.map(|(user, _)| user))
    }

    pub async fn delete_by_token_hash(&self, token_hash: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(format_timestamp(now))
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct VerificationRow {
    email: String,
    code: String,
    expires_at: String,
    created_at: String,
    verified: bool,
    verified_at: Option<String>,
}

impl TryFrom<VerificationRow> for VerificationRecord {
    type Error = AppError;

    fn try_from(row: VerificationRow) -> AppResult<Self> {
        Ok(VerificationRecord {
            email: row.email,
            code: row.code,
            expires_at: parse_timestamp(&row.expires_at)?,
            created_at: parse_timestamp(&row.created_at)?,
            verified: row.verified,
            verified_at: parse_optional_timestamp(row.verified_at.as_deref())?,
        })
    }
}

pub struct VerificationRepository {
    db: Arc<Database>,
}

impl VerificationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stores the record, replacing any earlier one for the same email.
    pub async fn upsert(&self, record: &VerificationRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO email_verifications (email, code, expires_at, created_at, verified, verified_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.email)
        .bind(&record.code)
        .bind(format_timestamp(record.expires_at))
        .bind(format_timestamp(record.created_at))
        .bind(record.verified)
        .bind(record.verified_at.map(format_timestamp))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn find(&self, email: &str) -> AppResult<Option<VerificationRecord>> {
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT email, code, expires_at, created_at, verified, verified_at FROM email_verifications WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(VerificationRecord::try_from).transpose()
    }

    /// Flips an unverified record to verified. Returns false if nothing changed.
    pub async fn mark_verified(&self, email: &str, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE email_verifications SET verified = 1, verified_at = ? WHERE email = ? AND verified = 0",
        )
        .bind(format_timestamp(at))
        .bind(email)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, email: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM email_verifications WHERE email = ?")
            .bind(email)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes unverified codes past `now` and verified records verified before `verified_before`.
    pub async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        verified_before: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_verifications
            WHERE (verified = 0 AND expires_at < ?)
               OR (verified = 1 AND verified_at < ?)
            "#,
        )
        .bind(format_timestamp(now))
        .bind(format_timestamp(verified_before))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct BoardRow {
    id: String,
    title: String,
    description: Option<String>,
    join_code: String,
    owner_id: String,
    is_active: bool,
    created_at: String,
}

impl TryFrom<BoardRow> for Board {
    type Error = AppError;

    fn try_from(row: BoardRow) -> AppResult<Self> {
        Ok(Board {
            id: parse_uuid(&row.id, "board")?,
            title: row.title,
            description: row.description,
            join_code: row.join_code,
            owner_id: parse_uuid(&row.owner_id, "user")?,
            is_active: row.is_active,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StudentRow {
    id: String,
    board_id: String,
    user_id: String,
    display_name: String,
    joined_at: String,
}

impl TryFrom<StudentRow> for Student {
    type Error = AppError;

    fn try_from(row: StudentRow) -> AppResult<Self> {
        Ok(Student {
            id: parse_uuid(&row.id, "student")?,
            board_id: parse_uuid(&row.board_id, "board")?,
            user_id: parse_uuid(&row.user_id, "user")?,
            display_name: row.display_name,
            joined_at: parse_timestamp(&row.joined_at)?,
        })
    }
}

const BOARD_COLUMNS: &str = "id, title, description, join_code, owner_id, is_active, created_at";
const STUDENT_COLUMNS: &str = "id, board_id, user_id, display_name, joined_at";

pub struct BoardRepository {
    db: Arc<Database>,
}

impl BoardRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, board: &Board) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO boards (id, title, description, join_code, owner_id, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(board.id.to_string())
        .bind(&board.title)
        .bind(&board.description)
        .bind(&board.join_code)
        .bind(board.owner_id.to_string())
        .bind(board.is_active)
        .bind(format_timestamp(board.created_at))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, board_id: Uuid) -> AppResult<Option<Board>> {
        let row = sqlx::query_as::<_, BoardRow>(&format!(
            "SELECT {} FROM boards WHERE id = ?",
            BOARD_COLUMNS
        ))
        .bind(board_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Board::try_from).transpose()
    }

    pub async fn find_by_join_code(&self, join_code: &str) -> AppResult<Option<Board>> {
        let row = sqlx::query_as::<_, BoardRow>(&format!(
            "SELECT {} FROM boards WHERE join_code = ?",
            BOARD_COLUMNS
        ))
        .bind(join_code)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Board::try_from).transpose()
    }

    pub async fn list_all(&self) -> AppResult<Vec<Board>> {
        let rows = sqlx::query_as::<_, BoardRow>(&format!(
            "SELECT {} FROM boards ORDER BY created_at DESC",
            BOARD_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Board::try_from).collect()
    }

    pub async fn list_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<Board>> {
        let rows = sqlx::query_as::<_, BoardRow>(&format!(
            "SELECT {} FROM boards WHERE owner_id = ? ORDER BY created_at DESC",
            BOARD_COLUMNS
        ))
        .bind(owner_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Board::try_from).collect()
    }

    /// Boards the user has joined as a student.
    pub async fn list_joined(&self, user_id: Uuid) -> AppResult<Vec<Board>> {
        let rows = sqlx::query_as::<_, BoardRow>(
            r#"
            SELECT b.id, b.title, b.description, b.join_code, b.owner_id, b.is_active, b.created_at
            FROM boards b
            JOIN students s ON s.board_id = b.id
            WHERE s.user_id = ?
            ORDER BY s.joined_at DESC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Board::try_from).collect()
    }

    pub async fn join_code_exists(&self, join_code: &str) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boards WHERE join_code = ?")
            .bind(join_code)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    pub async fn set_active(&self, board_id: Uuid, is_active: bool) -> AppResult<()> {
        sqlx::query("UPDATE boards SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(board_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, board_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM boards WHERE id = ?")
            .bind(board_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn insert_student(&self, student: &Student) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO students (id, board_id, user_id, display_name, joined_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(student.id.to_string())
        .bind(student.board_id.to_string())
        .bind(student.user_id.to_string())
        .bind(&student.display_name)
        .bind(format_timestamp(student.joined_at))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn find_student(&self, board_id: Uuid, user_id: Uuid) -> AppResult<Option<Student>> {
        let row = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM students WHERE board_id = ? AND user_id = ?",
            STUDENT_COLUMNS
        ))
        .bind(board_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Student::try_from).transpose()
    }

    pub async fn find_student_by_id(&self, student_id: Uuid) -> AppResult<Option<Student>> {
        let row = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM students WHERE id = ?",
            STUDENT_COLUMNS
        ))
        .bind(student_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Student::try_from).transpose()
    }

    pub async fn list_students(&self, board_id: Uuid) -> AppResult<Vec<Student>> {
        let rows = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM students WHERE board_id = ? ORDER BY joined_at ASC",
            STUDENT_COLUMNS
        ))
        .bind(board_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Student::try_from).collect()
    }

    pub async fn delete_student(&self, student_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(student_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

/// Photo row as stored; the public URL is derived from `image_path` by the media store.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub id: Uuid,
    pub board_id: Uuid,
    pub student_id: Uuid,
    pub image_path: String,
    pub content_type: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PhotoRow {
    id: String,
    board_id: String,
    student_id: String,
    image_path: String,
    content_type: String,
    caption: Option<String>,
    created_at: String,
}

impl TryFrom<PhotoRow> for StoredPhoto {
    type Error = AppError;

    fn try_from(row: PhotoRow) -> AppResult<Self> {
        Ok(StoredPhoto {
            id: parse_uuid(&row.id, "photo")?,
            board_id: parse_uuid(&row.board_id, "board")?,
            student_id: parse_uuid(&row.student_id, "student")?,
            image_path: row.image_path,
            content_type: row.content_type,
            caption: row.caption,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

const PHOTO_COLUMNS: &str = "id, board_id, student_id, image_path, content_type, caption, created_at";

pub struct PhotoRepository {
    db: Arc<Database>,
}

impl PhotoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, photo: &StoredPhoto) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO photos (id, board_id, student_id, image_path, content_type, caption, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(photo.id.to_string())
        .bind(photo.board_id.to_string())
        .bind(photo.student_id.to_string())
        .bind(&photo.image_path)
        .bind(&photo.content_type)
        .bind(&photo.caption)
        .bind(format_timestamp(photo.created_at))
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn find(&self, photo_id: Uuid) -> AppResult<Option<StoredPhoto>> {
        let row = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {} FROM photos WHERE id = ?",
            PHOTO_COLUMNS
        ))
        .bind(photo_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(StoredPhoto::try_from).transpose()
    }

    pub async fn list_by_board(&self, board_id: Uuid, limit: i64, offset: i64) -> AppResult<Vec<StoredPhoto>> {
        let rows = sqlx::query_as::<_, PhotoRow>(&format!(
            "SELECT {} FROM photos WHERE board_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            PHOTO_COLUMNS
        ))
        .bind(board_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(StoredPhoto::try_from).collect()
    }

    /// Image paths of every photo on a board.
    pub async fn image_paths_for_board(&self, board_id: Uuid) -> AppResult<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT image_path FROM photos WHERE board_id = ?")
            .bind(board_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        Ok(paths)
    }

    /// Image paths of every photo uploaded by a student.
    pub async fn image_paths_for_student(&self, student_id: Uuid) -> AppResult<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT image_path FROM photos WHERE student_id = ?")
            .bind(student_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        Ok(paths)
    }

    pub async fn delete(&self, photo_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(photo_id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
