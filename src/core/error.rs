use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Precondition failed: {0}")]
    FailedPrecondition(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidRequest(_) => 400,
            AppError::Auth(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::FailedPrecondition(_) => 409,
            AppError::Expired(_) => 410,
            AppError::RateLimit => 429,
            _ => 500,
        }
    }

    /// Stable machine-readable error kind returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid-argument",
            AppError::Auth(_) => "unauthenticated",
            AppError::Authorization(_) => "permission-denied",
            AppError::NotFound(_) => "not-found",
            AppError::FailedPrecondition(_) => "failed-precondition",
            AppError::Expired(_) => "deadline-exceeded",
            AppError::RateLimit => "resource-exhausted",
            _ => "internal",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
