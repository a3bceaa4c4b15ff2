use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::auth::service::AuthService;
use crate::board::service::BoardService;
use crate::core::config::Config;
use crate::core::error::AppResult;
use crate::crypto::service::CryptoService;
use crate::mail::client::{self, Mailer};
use crate::mail::templates::EmailTemplates;
use crate::storage::database::Database;
use crate::storage::media::MediaStore;
use crate::verification::service::VerificationService;
use crate::web::routes;

pub struct App {
    config: Config,
    state: Arc<AppState>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing application components");

        // Initialize database
        let db = Arc::new(Database::new(&config.database).await?);

        // Run migrations
        db.migrate().await?;

        let mailer: Arc<dyn Mailer> = Arc::from(client::from_config(&config.mail));
        let state = Arc::new(AppState::new(config.clone(), db, mailer)?);

        Ok(Self { config, state })
    }

    pub async fn run(self) -> Result<()> {
        spawn_cleanup(
            Arc::clone(&self.state),
            Duration::from_secs(self.config.verification.cleanup_interval_secs.max(1)),
        );

        let app = routes::create_router(Arc::clone(&self.state));

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port).parse()?;
        info!("Server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Periodically drops expired verification codes and sessions.
fn spawn_cleanup(state: Arc<AppState>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(e) = state.verification_service.purge_expired().await {
                error!("Verification cleanup failed: {}", e);
            }
            if let Err(e) = state.auth_service.cleanup_expired_sessions().await {
                error!("Session cleanup failed: {}", e);
            }
        }
    });
}

pub struct AppState {
    pub db: Arc<Database>,
    pub auth_service: Arc<AuthService>,
    pub board_service: Arc<BoardService>,
    pub verification_service: Arc<VerificationService>,
    pub media: Arc<MediaStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, db: Arc<Database>, mailer: Arc<dyn Mailer>) -> AppResult<Self> {
        let crypto_service = Arc::new(CryptoService::new());
        let media = Arc::new(MediaStore::new(&config.media, &config.server.base_url));

        let verification_service = Arc::new(VerificationService::new(
            Arc::clone(&db),
            Arc::clone(&crypto_service),
            mailer,
            EmailTemplates::new(&config.mail.product_name)?,
            config.verification.clone(),
        ));

        let auth_service = Arc::new(AuthService::new(
            Arc::clone(&db),
            Arc::clone(&crypto_service),
            Arc::clone(&verification_service),
            config.security.clone(),
        ));

        let board_service = Arc::new(BoardService::new(
            Arc::clone(&db),
            crypto_service,
            Arc::clone(&auth_service),
            Arc::clone(&media),
            &config.server.base_url,
            config.media.max_upload_bytes,
        ));

        Ok(Self {
            db,
            auth_service,
            board_service,
            verification_service,
            media,
            config,
        })
    }
}
