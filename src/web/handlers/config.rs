use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::core::app::AppState;

/// Values the client reads at startup instead of hard-coding them.
#[derive(Debug, Serialize)]
pub struct PublicConfig {
    pub product_name: String,
    pub allowed_email_domains: Vec<String>,
    pub verification_code_ttl_secs: i64,
    pub max_upload_bytes: usize,
}

pub async fn public_config(State(state): State<Arc<AppState>>) -> Json<PublicConfig> {
    Json(PublicConfig {
        product_name: state.config.mail.product_name.clone(),
        allowed_email_domains: state.verification_service.allowed_email_domains().to_vec(),
        verification_code_ttl_secs: state.verification_service.code_ttl_secs(),
        max_upload_bytes: state.config.media.max_upload_bytes,
    })
}
