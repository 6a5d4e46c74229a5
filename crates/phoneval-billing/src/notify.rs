//! Welcome Notifications
//!
//! Fire-and-forget delivery of the "your key is ready" email. Failures are
//! reported to the caller, which logs them; they never undo issuance.

use async_trait::async_trait;
use serde_json::json;

use crate::credential::Credential;
use crate::error::{BillingError, Result};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const DEFAULT_FROM: &str = "onboarding@resend.dev";
const DEFAULT_API_BASE_URL: &str = "https://your-api-domain.com";

pub const WELCOME_SUBJECT: &str = "Welcome to Phone Validation API - Your API Key is Ready!";

/// A rendered welcome message
#[derive(Clone, Debug)]
pub struct WelcomeEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl WelcomeEmail {
    /// Render for a freshly issued credential; `None` without an address
    pub fn for_credential(credential: &Credential, api_base_url: &str) -> Option<Self> {
        let to = credential.email.clone()?;
        let greeting = credential
            .name
            .as_deref()
            .map_or_else(|| "Hi there,".to_string(), |n| format!("Hi {n},"));
        let key = credential.key.as_str();
        let plan = credential.plan.display_name();
        let limit = credential.requests_limit;

        let text = format!(
            "Welcome to Phone Validation API!\n\n{greeting}\n\n\
             Your API key has been generated and is ready to use.\n\n\
             Your API Key:\n{key}\n\n\
             Keep this key secure and don't share it publicly.\n\n\
             Your Plan: {plan}\nMonthly Requests: {limit}\n\n\
             Send it in the x-api-key header:\n\
             curl \"{api_base_url}/api/validate?phone=+14155552671\" -H \"x-api-key: {key}\"\n"
        );
        let html = format!(
            "<p>{greeting}</p>\
             <p>Your API key has been generated and is ready to use.</p>\
             <pre>{key}</pre>\
             <p><strong>Your Plan:</strong> {plan}<br><strong>Monthly Requests:</strong> {limit}</p>\
             <p>Send it in the <code>x-api-key</code> header to <code>{api_base_url}/api/validate</code>.</p>"
        );

        Some(Self {
            to,
            subject: WELCOME_SUBJECT.to_string(),
            text,
            html,
        })
    }
}

/// Notification sender seam
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_welcome(&self, email: &WelcomeEmail) -> Result<()>;

    /// Base URL quoted in messages
    fn api_base_url(&self) -> &str {
        DEFAULT_API_BASE_URL
    }
}

/// Resend configuration
#[derive(Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub from: String,
    pub api_base_url: String,
}

impl ResendConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("RESEND_KEY")
            .map_err(|_| BillingError::Config("RESEND_KEY not set".into()))?;
        Ok(Self {
            api_key,
            from: std::env::var("RESEND_FROM_EMAIL").unwrap_or_else(|_| DEFAULT_FROM.into()),
            api_base_url: std::env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.into()),
        })
    }
}

/// Resend HTTP API notifier
pub struct ResendNotifier {
    http: reqwest::Client,
    config: ResendConfig,
}

impl ResendNotifier {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ResendConfig::from_env()?))
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send_welcome(&self, email: &WelcomeEmail) -> Result<()> {
        let response = self
            .http
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": [email.to],
                "subject": email.subject,
                "text": email.text,
                "html": email.html,
            }))
            .send()
            .await
            .map_err(|e| BillingError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Notification(format!("Resend returned HTTP {status}: {body}")));
        }

        Ok(())
    }

    fn api_base_url(&self) -> &str {
        &self.config.api_base_url
    }
}

/// Stand-in used when no email provider is configured; every send fails
/// with the configuration reason so issuance logs it.
pub struct DisabledNotifier {
    reason: String,
}

impl DisabledNotifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send_welcome(&self, _email: &WelcomeEmail) -> Result<()> {
        Err(BillingError::Notification(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Plan;

    #[test]
    fn test_render_welcome() {
        let credential = Credential::paid(
            "O-1",
            Plan::Pro,
            Some("ada@example.com".into()),
            Some("Ada".into()),
        );
        let email = WelcomeEmail::for_credential(&credential, "https://api.test").unwrap();
        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, WELCOME_SUBJECT);
        assert!(email.text.contains("Hi Ada,"));
        assert!(email.text.contains(credential.key.as_str()));
        assert!(email.text.contains("Monthly Requests: 10000"));
        assert!(email.html.contains("https://api.test/api/validate"));
    }

    #[test]
    fn test_no_address_no_email() {
        let credential = Credential::paid("O-1", Plan::Standard, None, None);
        assert!(WelcomeEmail::for_credential(&credential, DEFAULT_API_BASE_URL).is_none());
    }

    #[tokio::test]
    async fn test_disabled_notifier_reports_reason() {
        let notifier = DisabledNotifier::new("RESEND_KEY not set");
        let credential = Credential::free("a@b.co");
        let email = WelcomeEmail::for_credential(&credential, notifier.api_base_url()).unwrap();
        let err = notifier.send_welcome(&email).await.unwrap_err();
        assert!(err.to_string().contains("RESEND_KEY"));
        assert!(email.text.starts_with("Welcome"));
    }
}
