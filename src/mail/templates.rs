use handlebars::Handlebars;
use serde_json::json;

use crate::core::error::{AppError, AppResult};

const VERIFICATION_HTML: &str = include_str!("../../templates/verification_email.hbs");
const VERIFICATION_TEXT: &str = "Your {{product_name}} verification code is {{code}}.\n\
This code expires in {{ttl_minutes}} minutes.\n\
If you did not request this code, you can ignore this email.\n";

pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailTemplates {
    registry: Handlebars<'static>,
    product_name: String,
}

impl EmailTemplates {
    pub fn new(product_name: &str) -> AppResult<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string("verification_html", VERIFICATION_HTML)
            .map_err(|e| AppError::Internal(format!("Invalid email template: {}", e)))?;
        registry
            .register_template_string("verification_text", VERIFICATION_TEXT)
            .map_err(|e| AppError::Internal(format!("Invalid email template: {}", e)))?;

        Ok(Self {
            registry,
            product_name: product_name.to_string(),
        })
    }

    pub fn verification(&self, code: &str, ttl_minutes: i64) -> AppResult<RenderedEmail> {
        let data = json!({
            "product_name": self.product_name,
            "code": code,
            "ttl_minutes": ttl_minutes,
        });

        Ok(RenderedEmail {
            subject: format!("Your {} verification code", self.product_name),
            html: self.registry.render("verification_html", &data)?,
            text: self.registry.render("verification_text", &data)?,
        })
    }
}
