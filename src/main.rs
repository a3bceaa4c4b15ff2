mod auth;
mod board;
mod core;
mod crypto;
mod mail;
mod storage;
mod verification;
mod web;

use anyhow::Result;
use tracing::{error, info};

use crate::core::app::App;
use crate::core::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    info!("Starting Art Wall server");

    // Load configuration
    let config = Config::load().await?;

    // Initialize the application
    let app = App::new(config).await?;

    // Start the application
    if let Err(e) = app.run().await {
        error!("Application error: {}", e);
        return Err(e);
    }

    Ok(())
}
