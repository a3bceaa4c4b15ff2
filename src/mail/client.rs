use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::core::config::MailConfig;
use crate::core::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Outbound transactional email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<()>;
}

/// Builds the mailer for the configuration: the HTTP API when a key is set,
/// otherwise a logger for local development.
pub fn from_config(config: &MailConfig) -> Box<dyn Mailer> {
    match &config.api_key {
        Some(api_key) => {
            info!("Sending email through {}", config.api_url);
            Box::new(HttpMailer::new(config, api_key))
        }
        None => {
            warn!("No mail API key provided - emails will only be logged");
            Box::new(LogMailer)
        }
    }
}

/// Client for a SendGrid-compatible `mail/send` endpoint.
pub struct HttpMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_address: String,
    from_name: String,
}

impl HttpMailer {
    pub fn new(config: &MailConfig, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
        }
    }

    fn payload(&self, email: &OutgoingEmail) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_address, "name": self.from_name },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<()> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await
            .map_err(|e| AppError::Mail(format!("Failed to reach mail API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("Mail API returned {}: {}", status, body)));
        }

        info!("Sent \"{}\" to {}", email.subject, email.to);
        Ok(())
    }
}

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<()> {
        info!("Email to {}: {}\n{}", email.to, email.subject, email.text);
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Keeps every message instead of sending it; optionally fails every send.
    #[derive(Clone, Default)]
    pub struct RecordingMailer {
        sent: Arc<Mutex<Vec<OutgoingEmail>>>,
        fail: Arc<AtomicBool>,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                sent: Arc::default(),
                fail: Arc::new(AtomicBool::new(true)),
            }
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<OutgoingEmail> {
            self.sent.lock().unwrap().clone()
        }

        /// The six-digit code from the most recent message to `to`.
        pub fn last_code_for(&self, to: &str) -> Option<String> {
            self.sent()
                .iter()
                .rev()
                .find(|email| email.to == to)
                .and_then(|email| {
                    email
                        .text
                        .split(|c: char| !c.is_ascii_digit())
                        .find(|token| token.len() == 6)
                        .map(str::to_string)
                })
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> AppResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Mail("Mail API returned 503".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}
