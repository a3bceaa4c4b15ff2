use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::config::SecurityConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::types::{LoginRequest, RegisterRequest, Role, User};
use crate::crypto::service::CryptoService;
use crate::storage::database::Database;
use crate::storage::repositories::{SessionRepository, UserRepository};
use crate::verification::service::{normalize_email, VerificationService};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_DISPLAY_NAME_LEN: usize = 64;

pub struct AuthService {
    users: UserRepository,
    sessions: SessionRepository,
    crypto: Arc<CryptoService>,
    verification: Arc<VerificationService>,
    config: SecurityConfig,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn validate_display_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidRequest("Display name is required".to_string()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Display name must be at most {} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

impl AuthService {
    pub fn new(
        db: Arc<Database>,
        crypto: Arc<CryptoService>,
        verification: Arc<VerificationService>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            users: UserRepository::new(Arc::clone(&db)),
            sessions: SessionRepository::new(db),
            crypto,
            verification,
            config,
        }
    }

    /// Register a teacher (or admin) account for a verified email
    pub async fn register(&self, request: RegisterRequest) -> AppResult<User> {
        let email = normalize_email(&request.email)?;
        let display_name = validate_display_name(&request.display_name)?;

        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::InvalidRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::InvalidRequest("Email already registered".to_string()));
        }

        if !self.verification.is_verified(&email).await? {
            return Err(AppError::FailedPrecondition("Email has not been verified".to_string()));
        }

        let role = if self.config.admin_emails.contains(&email) {
            Role::Admin
        } else {
            Role::Teacher
        };

        let password_hash = self.crypto.hash_password(&request.password)?;
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.clone()),
            display_name,
            role,
            created_at: Utc::now(),
            last_seen: None,
        };

        self.users.insert(&user, Some(&password_hash)).await?;
        self.verification.consume_verified(&email).await?;

        info!("Registered {} account for {}", user.role, email);
        Ok(user)
    }

    /// Anonymous account for a student joining a board
    pub async fn create_student(&self, display_name: &str) -> AppResult<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: None,
            display_name: validate_display_name(display_name)?,
            role: Role::Student,
            created_at: Utc::now(),
            last_seen: None,
        };

        self.users.insert(&user, None).await?;
        Ok(user)
    }

    /// Login with email and password
    pub async fn login(&self, request: LoginRequest) -> AppResult<(User, Session)> {
        let invalid = || AppError::Auth("Invalid credentials".to_string());
        let email = normalize_email(&request.email).map_err(|_| invalid())?;

        let (mut user, password_hash) = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or_else(invalid)?;

        let password_hash = password_hash.ok_or_else(invalid)?;
        if !self.crypto.verify_password(&request.password, &password_hash)? {
            return Err(invalid());
        }

        let session = self.create_session(user.id).await?;

        let now = Utc::now();
        self.users.touch_last_seen(user.id, now).await?;
        user.last_seen = Some(now);

        Ok((user, session))
    }

    /// Create a new session for a user
    pub async fn create_session(&self, user_id: Uuid) -> AppResult<Session> {
        let session_id = Uuid::new_v4();
        let token = self.crypto.generate_token()?;
        let token_hash = self.crypto.hash_data(&token);
        let expires_at = Utc::now() + Duration::days(self.config.session_ttl_days);

        self.sessions
            .insert(session_id, user_id, &token_hash, expires_at)
            .await?;

        Ok(Session {
            id: session_id,
            user_id,
            token,
            expires_at,
        })
    }

    /// Validate a session token
    pub async fn validate_session(&self, token: &str) -> AppResult<User> {
        let token_hash = self.crypto.hash_data(token);
        self.sessions
            .find_user(&token_hash, Utc::now())
            .await?
            .ok_or_else(|| AppError::Auth("Invalid or expired session".to_string()))
    }

    /// Logout a user (invalidate session)
    pub async fn logout(&self, token: &str) -> AppResult<()> {
        let token_hash = self.crypto.hash_data(token);
        self.sessions.delete_by_token_hash(&token_hash).await
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: Uuid) -> AppResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        self.users.list().await
    }

    /// Delete a user with their sessions and owned boards
    pub async fn delete_user(&self, actor: &User, user_id: Uuid) -> AppResult<()> {
        if actor.id == user_id {
            return Err(AppError::InvalidRequest("Cannot delete your own account".to_string()));
        }
        if !self.users.delete(user_id).await? {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        info!("User {} deleted by {}", user_id, actor.id);
        Ok(())
    }

    /// Clean up expired sessions
    pub async fn cleanup_expired_sessions(&self) -> AppResult<u64> {
        let purged = self.sessions.delete_expired(Utc::now()).await?;
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }
}
