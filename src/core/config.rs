use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub mail: MailConfig,
    pub verification: VerificationConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub session_ttl_days: i64,
    /// Accounts registered with one of these emails get the admin role.
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub product_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub code_ttl_secs: i64,
    pub resend_cooldown_secs: i64,
    /// How long a verified email stays usable for registration.
    pub verified_retention_secs: i64,
    /// Empty means every domain is accepted.
    pub allowed_email_domains: Vec<String>,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub root: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub async fn load() -> Result<Self> {
        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("PORT", 3000),
                base_url: env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:./data.db?mode=rwc".to_string()),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10),
            },
            security: SecurityConfig {
                session_ttl_days: parse_var("SESSION_TTL_DAYS", 30),
                admin_emails: list_var("ADMIN_EMAILS"),
            },
            mail: MailConfig {
                api_url: env::var("MAIL_API_URL")
                    .unwrap_or_else(|_| "https://api.sendgrid.com/v3/mail/send".to_string()),
                api_key: env::var("MAIL_API_KEY").ok().filter(|key| !key.is_empty()),
                from_address: env::var("MAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "no-reply@artwall.app".to_string()),
                from_name: env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "Art Wall".to_string()),
                product_name: env::var("PRODUCT_NAME").unwrap_or_else(|_| "Art Wall".to_string()),
            },
            verification: VerificationConfig {
                code_ttl_secs: parse_var("VERIFICATION_CODE_TTL_SECS", 300),
                resend_cooldown_secs: parse_var("VERIFICATION_RESEND_COOLDOWN_SECS", 30),
                verified_retention_secs: parse_var("VERIFIED_EMAIL_RETENTION_SECS", 3600),
                allowed_email_domains: list_var("ALLOWED_EMAIL_DOMAINS"),
                cleanup_interval_secs: parse_var("CLEANUP_INTERVAL_SECS", 600),
            },
            media: MediaConfig {
                root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string()),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            },
        };

        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, lowercased, blanks dropped.
fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
impl Config {
    /// Configuration for tests: in-memory database, no mail API key, no cooldown.
    pub fn for_tests() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                base_url: "http://wall.test".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            security: SecurityConfig {
                session_ttl_days: 30,
                admin_emails: vec!["principal@school.test".to_string()],
            },
            mail: MailConfig {
                api_url: "http://mail.test/send".to_string(),
                api_key: None,
                from_address: "no-reply@wall.test".to_string(),
                from_name: "Art Wall".to_string(),
                product_name: "Art Wall".to_string(),
            },
            verification: VerificationConfig {
                code_ttl_secs: 300,
                resend_cooldown_secs: 0,
                verified_retention_secs: 3600,
                allowed_email_domains: Vec::new(),
                cleanup_interval_secs: 600,
            },
            media: MediaConfig {
                root: std::env::temp_dir()
                    .join(format!("art-wall-media-{}", uuid::Uuid::new_v4()))
                    .to_string_lossy()
                    .into_owned(),
                max_upload_bytes: 1024,
            },
        }
    }
}
