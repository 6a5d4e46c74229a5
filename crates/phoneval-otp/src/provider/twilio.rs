//! Twilio Verify client

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Challenge, Channel, CheckVerdict, OtpProvider};
use crate::error::{OtpError, ProviderError, Result};

const VERIFY_BASE_URL: &str = "https://verify.twilio.com/v2";

/// Which call produced an error; the same code means different things
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Send,
    Check,
}

/// Twilio credentials and Verify service id
#[derive(Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub service_sid: String,
    /// Override for the Verify API root
    pub base_url: Option<String>,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("service_sid", &self.service_sid)
            .finish_non_exhaustive()
    }
}

impl TwilioConfig {
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).map_err(|_| OtpError::Config(format!("{name} not set")));
        Ok(Self {
            account_sid: var("TWILIO_SID")?,
            auth_token: var("TWILIO_AUTH_TOKEN")?,
            service_sid: var("TWILIO_VERIFY_SERVICE")?,
            base_url: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct VerificationResource {
    sid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    to: Option<String>,
}

/// Map a Twilio error response to a provider error kind
pub fn classify_error(operation: Operation, status: StatusCode, code: Option<i64>, message: &str) -> ProviderError {
    let message = message.to_string();
    match (code, operation) {
        (Some(60200 | 60203), _) => ProviderError::InvalidDestination(message),
        (Some(20429 | 60202), _) => ProviderError::RateLimited(message),
        (Some(20003), _) => ProviderError::AuthMisconfigured(message),
        // On send, 20404 is the service itself
        (Some(20404), Operation::Send) => ProviderError::AuthMisconfigured(format!("Verify service not found: {message}")),
        (Some(20404), Operation::Check) => ProviderError::UnknownChallenge(message),
        (Some(code), _) if status.is_server_error() => {
            ProviderError::Unavailable(format!("{code}: {message}"))
        }
        (Some(code), _) => ProviderError::Other { code, message },
        (None, _) => match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthMisconfigured(message),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
            StatusCode::NOT_FOUND if operation == Operation::Check => ProviderError::UnknownChallenge(message),
            s if s.is_server_error() => ProviderError::Unavailable(message),
            s => ProviderError::Other {
                code: i64::from(s.as_u16()),
                message,
            },
        },
    }
}

/// Twilio Verify v2 client
pub struct TwilioVerifyClient {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioVerifyClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(TwilioConfig::from_env()?))
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/Services/{}/{resource}",
            self.config.base_url.as_deref().unwrap_or(VERIFY_BASE_URL),
            self.config.service_sid
        )
    }

    async fn post(
        &self,
        operation: Operation,
        resource: &str,
        form: &[(&str, &str)],
    ) -> std::result::Result<VerificationResource, ProviderError> {
        let response = self
            .http
            .post(self.url(resource))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: TwilioErrorBody = response.json().await.unwrap_or_default();
            let message = body.message.unwrap_or_else(|| format!("HTTP {status}"));
            let err = classify_error(operation, status, body.code, &message);
            tracing::error!(?operation, %status, code = ?body.code, "Twilio Verify error: {}", message);
            return Err(err);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl OtpProvider for TwilioVerifyClient {
    async fn send_challenge(&self, phone: &str, channel: Channel) -> std::result::Result<Challenge, ProviderError> {
        let resource = self
            .post(Operation::Send, "Verifications", &[("To", phone), ("Channel", channel.as_str())])
            .await?;

        Ok(Challenge {
            reference: resource.sid,
            phone: resource.to.unwrap_or_else(|| phone.to_string()),
            channel,
            status: resource.status,
        })
    }

    async fn check_challenge(&self, phone: &str, code: &str) -> std::result::Result<CheckVerdict, ProviderError> {
        let resource = self
            .post(Operation::Check, "VerificationCheck", &[("To", phone), ("Code", code)])
            .await?;

        Ok(CheckVerdict {
            approved: resource.status == "approved",
            status: resource.status,
            reference: Some(resource.sid),
        })
    }

    fn name(&self) -> &str {
        "twilio-verify"
    }
}
