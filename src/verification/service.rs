use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::VerificationConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::types::{VerificationRecord, VerificationResponse};
use crate::crypto::service::CryptoService;
use crate::mail::client::{Mailer, OutgoingEmail};
use crate::mail::templates::EmailTemplates;
use crate::storage::database::Database;
use crate::storage::repositories::VerificationRepository;

pub struct VerificationService {
    repo: VerificationRepository,
    crypto: Arc<CryptoService>,
    mailer: Arc<dyn Mailer>,
    templates: EmailTemplates,
    config: VerificationConfig,
}

/// Trims and lowercases an address, rejecting anything that is not `local@domain.tld`.
pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::InvalidRequest("Email is required".to_string()));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(AppError::InvalidRequest(format!("Invalid email address: {}", email)));
    }
    Ok(email)
}

impl VerificationService {
    pub fn new(
        db: Arc<Database>,
        crypto: Arc<CryptoService>,
        mailer: Arc<dyn Mailer>,
        templates: EmailTemplates,
        config: VerificationConfig,
    ) -> Self {
        Self {
            repo: VerificationRepository::new(db),
            crypto,
            mailer,
            templates,
            config,
        }
    }

    pub fn code_ttl_secs(&self) -> i64 {
        self.config.code_ttl_secs
    }

    pub fn allowed_email_domains(&self) -> &[String] {
        &self.config.allowed_email_domains
    }

    fn check_domain(&self, email: &str) -> AppResult<()> {
        if self.config.allowed_email_domains.is_empty() {
            return Ok(());
        }
        let domain = email.rsplit('@').next().unwrap_or_default();
        if self
            .config
            .allowed_email_domains
            .iter()
            .any(|allowed| allowed == domain)
        {
            Ok(())
        } else {
            Err(AppError::InvalidRequest(format!(
                "Email domain {} is not allowed",
                domain
            )))
        }
    }

    /// Generate a code, store it with an expiry and email it
    pub async fn send_verification_email(&self, email: &str) -> AppResult<VerificationResponse> {
        let email = normalize_email(email)?;
        self.check_domain(&email)?;

        let now = Utc::now();
        if self.config.resend_cooldown_secs > 0 {
            if let Some(existing) = self.repo.find(&email).await? {
                if now < existing.created_at + Duration::seconds(self.config.resend_cooldown_secs) {
                    return Err(AppError::RateLimit);
                }
            }
        }

        let code = self.crypto.generate_verification_code()?;
        let record = VerificationRecord {
            email: email.clone(),
            code: code.clone(),
            expires_at: now + Duration::seconds(self.config.code_ttl_secs),
            created_at: now,
            verified: false,
            verified_at: None,
        };
        self.repo.upsert(&record).await?;

        let rendered = self
            .templates
            .verification(&code, (self.config.code_ttl_secs + 59) / 60)?;
        let outgoing = OutgoingEmail {
            to: email.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        };

        if let Err(e) = self.mailer.send(&outgoing).await {
            warn!("Failed to send verification email to {}: {}", email, e);
            // Nothing was delivered, so the retry must not hit the cooldown.
            self.repo.delete(&email).await?;
            return Err(AppError::Internal("Failed to send verification email".to_string()));
        }

        info!("Verification code sent to {}", email);
        Ok(VerificationResponse {
            success: true,
            message: "Verification email sent".to_string(),
        })
    }

    /// Check a code against the stored record and mark the email verified
    pub async fn verify_email_code(&self, email: &str, code: &str) -> AppResult<VerificationResponse> {
        let code = code.trim();
        if email.trim().is_empty() || code.is_empty() {
            return Err(AppError::InvalidRequest("Email and code are required".to_string()));
        }
        let email = normalize_email(email)?;

        let record = self
            .repo
            .find(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("No verification code found".to_string()))?;

        let now = Utc::now();
        if now > record.expires_at {
            self.repo.delete(&email).await?;
            info!("Expired verification code for {} removed", email);
            return Err(AppError::Expired("Verification code has expired".to_string()));
        }

        if record.verified {
            return Err(AppError::FailedPrecondition(
                "Email has already been verified".to_string(),
            ));
        }

        if record.code != code {
            return Err(AppError::InvalidRequest("Invalid verification code".to_string()));
        }

        // Conditional update, so two concurrent requests cannot both succeed.
        if !self.repo.mark_verified(&email, now).await? {
            return Err(AppError::FailedPrecondition(
                "Email has already been verified".to_string(),
            ));
        }

        info!("Email verified: {}", email);
        Ok(VerificationResponse {
            success: true,
            message: "Email verified successfully".to_string(),
        })
    }

    fn verified_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(self.config.verified_retention_secs)
    }

    /// Whether the email was verified within the retention window
    pub async fn is_verified(&self, email: &str) -> AppResult<bool> {
        let email = normalize_email(email)?;
        let cutoff = self.verified_cutoff(Utc::now());
        Ok(self
            .repo
            .find(&email)
            .await?
            .and_then(|record| record.verified_at.filter(|_| record.verified))
            .map_or(false, |verified_at| verified_at >= cutoff))
    }

    /// Drops a verified record once it has been used
    pub async fn consume_verified(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email)?;
        self.repo.delete(&email).await
    }

    /// Delete unverified codes past their expiry and verifications past retention
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let now = Utc::now();
        let purged = self
            .repo
            .delete_expired(now, self.verified_cutoff(now))
            .await?;
        if purged > 0 {
            info!("Purged {} expired verification codes", purged);
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::mail::client::testing::RecordingMailer;

    struct Fixture {
        service: VerificationService,
        repo: VerificationRepository,
        mailer: RecordingMailer,
    }

    async fn fixture_with(config: VerificationConfig, mailer: RecordingMailer) -> Fixture {
        let db = Arc::new(Database::in_memory().await);
        let service = VerificationService::new(
            Arc::clone(&db),
            Arc::new(CryptoService::new()),
            Arc::new(mailer.clone()),
            EmailTemplates::new("Art Wall").unwrap(),
            config,
        );
        Fixture {
            service,
            repo: VerificationRepository::new(db),
            mailer,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Config::for_tests().verification, RecordingMailer::default()).await
    }

    async fn expire(repo: &VerificationRepository, email: &str) {
        let mut record = repo.find(email).await.unwrap().unwrap();
        record.expires_at = Utc::now() - Duration::seconds(1);
        repo.upsert(&record).await.unwrap();
    }

    #[tokio::test]
    async fn send_stores_an_unverified_record_and_emails_the_code() {
        let f = fixture().await;

        let response = f
            .service
            .send_verification_email("Teacher@School.test ")
            .await
            .unwrap();
        assert!(response.success);

        let record = f.repo.find("teacher@school.test").await.unwrap().unwrap();
        assert!(!record.verified);
        assert_eq!(record.code.len(), 6);
        assert_eq!((record.expires_at - record.created_at).num_seconds(), 300);
        assert_eq!(
            f.mailer.last_code_for("teacher@school.test"),
            Some(record.code.clone())
        );
    }

    #[tokio::test]
    async fn correct_code_verifies_exactly_once() {
        let f = fixture().await;
        f.service.send_verification_email("teacher@school.test").await.unwrap();
        let code = f.mailer.last_code_for("teacher@school.test").unwrap();

        let response = f
            .service
            .verify_email_code("teacher@school.test", &code)
            .await
            .unwrap();
        assert_eq!(response.message, "Email verified successfully");
        assert!(f.service.is_verified("teacher@school.test").await.unwrap());

        let record = f.repo.find("teacher@school.test").await.unwrap().unwrap();
        assert!(record.verified_at.is_some());

        let again = f
            .service
            .verify_email_code("teacher@school.test", &code)
            .await
            .unwrap_err();
        assert_eq!(again.code(), "failed-precondition");
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_and_leaves_record_unverified() {
        let f = fixture().await;
        f.service.send_verification_email("teacher@school.test").await.unwrap();
        let code = f.mailer.last_code_for("teacher@school.test").unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };

        let err = f
            .service
            .verify_email_code("teacher@school.test", wrong)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
        assert!(!f.service.is_verified("teacher@school.test").await.unwrap());

        // The right code still works afterwards.
        f.service
            .verify_email_code("teacher@school.test", &code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_code_fails_and_deletes_the_record() {
        let f = fixture().await;
        f.service.send_verification_email("teacher@school.test").await.unwrap();
        let code = f.mailer.last_code_for("teacher@school.test").unwrap();
        expire(&f.repo, "teacher@school.test").await;

        let err = f
            .service
            .verify_email_code("teacher@school.test", &code)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "deadline-exceeded");
        assert!(f.repo.find("teacher@school.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_without_send_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .verify_email_code("nobody@school.test", "123456")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn missing_arguments_are_invalid() {
        let f = fixture().await;
        let err = f.service.verify_email_code("", "123456").await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
        let err = f
            .service
            .verify_email_code("teacher@school.test", "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
        let err = f.service.send_verification_email("not-an-email").await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }

    #[tokio::test]
    async fn resending_replaces_the_previous_code() {
        let f = fixture().await;
        f.service.send_verification_email("teacher@school.test").await.unwrap();
        f.service.send_verification_email("teacher@school.test").await.unwrap();

        let latest = f.mailer.last_code_for("teacher@school.test").unwrap();
        let stored = f.repo.find("teacher@school.test").await.unwrap().unwrap();
        assert_eq!(stored.code, latest);
        assert_eq!(f.mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn resend_within_cooldown_is_rate_limited() {
        let mut config = Config::for_tests().verification;
        config.resend_cooldown_secs = 60;
        let f = fixture_with(config, RecordingMailer::default()).await;

        f.service.send_verification_email("teacher@school.test").await.unwrap();
        let err = f
            .service
            .send_verification_email("teacher@school.test")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "resource-exhausted");
        assert_eq!(f.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn disallowed_domains_are_rejected_before_sending() {
        let mut config = Config::for_tests().verification;
        config.allowed_email_domains = vec!["school.test".to_string()];
        let f = fixture_with(config, RecordingMailer::default()).await;

        f.service.send_verification_email("teacher@school.test").await.unwrap();
        let err = f
            .service
            .send_verification_email("someone@gmail.test")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
        assert!(f.repo.find("someone@gmail.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mail_failure_is_reported_as_internal() {
        let f = fixture_with(Config::for_tests().verification, RecordingMailer::failing()).await;
        let err = f
            .service
            .send_verification_email("teacher@school.test")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn retry_after_failed_send_is_not_rate_limited() {
        let mut config = Config::for_tests().verification;
        config.resend_cooldown_secs = 60;
        let f = fixture_with(config, RecordingMailer::failing()).await;

        let err = f
            .service
            .send_verification_email("teacher@school.test")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
        assert!(f.repo.find("teacher@school.test").await.unwrap().is_none());

        f.mailer.set_failing(false);
        f.service
            .send_verification_email("teacher@school.test")
            .await
            .unwrap();
        assert_eq!(f.mailer.sent().len(), 1);
        let stored = f.repo.find("teacher@school.test").await.unwrap().unwrap();
        assert_eq!(f.mailer.last_code_for("teacher@school.test"), Some(stored.code));
    }

    #[tokio::test]
    async fn stale_verifications_lapse_and_are_purged() {
        let f = fixture().await;
        f.service.send_verification_email("old@school.test").await.unwrap();
        let code = f.mailer.last_code_for("old@school.test").unwrap();
        f.service.verify_email_code("old@school.test", &code).await.unwrap();
        f.service.send_verification_email("fresh@school.test").await.unwrap();
        let code = f.mailer.last_code_for("fresh@school.test").unwrap();
        f.service.verify_email_code("fresh@school.test", &code).await.unwrap();

        let mut record = f.repo.find("old@school.test").await.unwrap().unwrap();
        record.verified_at = Some(Utc::now() - Duration::days(365));
        f.repo.upsert(&record).await.unwrap();

        assert!(!f.service.is_verified("old@school.test").await.unwrap());
        assert!(f.service.is_verified("fresh@school.test").await.unwrap());

        assert_eq!(f.service.purge_expired().await.unwrap(), 1);
        assert!(f.repo.find("old@school.test").await.unwrap().is_none());
        assert!(f.repo.find("fresh@school.test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_unverified_codes() {
        let f = fixture().await;
        f.service.send_verification_email("old@school.test").await.unwrap();
        f.service.send_verification_email("new@school.test").await.unwrap();
        expire(&f.repo, "old@school.test").await;

        assert_eq!(f.service.purge_expired().await.unwrap(), 1);
        assert!(f.repo.find("old@school.test").await.unwrap().is_none());
        assert!(f.repo.find("new@school.test").await.unwrap().is_some());
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  A@B.Test ").unwrap(), "a@b.test");
        for bad in ["", "plain", "@b.test", "a@b", "a@.test", "a@b.test.", "a b@c.test", "a@b@c.test"] {
            assert!(normalize_email(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
