//! Verification Flow
//!
//! Send path: validate, rate-limit, send, record.
//! Check path: validate, ask the provider, record the verdict.

use serde::Serialize;
use std::sync::Arc;

use crate::attempt::AttemptStore;
use crate::error::{OtpError, ProviderError, Result};
use crate::limiter::{RateLimitPolicy, RateLimiter};
use crate::phone::PhoneParser;
use crate::provider::{Channel, OtpProvider};
use crate::tracker::{SessionTracker, Transition, VerificationOutcome};

const CODE_LENGTH: usize = 6;

/// Exactly six ASCII digits
pub fn is_otp_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Result of a send
#[derive(Clone, Debug, Serialize)]
pub struct SendReceipt {
    /// Canonical E.164 destination
    pub phone: String,
    pub reference: String,
    pub channel: Channel,
    /// Whether the attempt made it into the history
    pub recorded: bool,
}

/// Result of a check
#[derive(Clone, Debug, Serialize)]
pub struct CheckResult {
    pub phone: String,
    pub verified: bool,
    pub status: String,
}

/// Orchestrates OTP send and check
pub struct VerificationFlow {
    parser: Arc<dyn PhoneParser>,
    provider: Arc<dyn OtpProvider>,
    limiter: RateLimiter,
    tracker: SessionTracker,
    channel: Channel,
}

impl VerificationFlow {
    pub fn new(
        parser: Arc<dyn PhoneParser>,
        provider: Arc<dyn OtpProvider>,
        store: Arc<dyn AttemptStore>,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            parser,
            provider,
            limiter: RateLimiter::new(store.clone(), policy),
            tracker: SessionTracker::new(store),
            channel: Channel::Sms,
        }
    }

    /// Use a different delivery channel
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    fn canonical_phone(&self, raw: &str) -> Result<String> {
        if raw.trim().is_empty() {
            return Err(OtpError::Validation("Missing required parameter: phone".into()));
        }
        let parsed = self.parser.parse(raw, None).ok_or_else(|| {
            OtpError::Validation(
                "Invalid phone number format. Use E.164 format (e.g., +1234567890)".into(),
            )
        })?;
        if !parsed.valid {
            return Err(OtpError::Validation("Invalid phone number".into()));
        }
        Ok(parsed.e164)
    }

    /// Send a code to `raw_phone` on behalf of `credential_key`
    pub async fn send_code(&self, raw_phone: &str, credential_key: &str) -> Result<SendReceipt> {
        let phone = self.canonical_phone(raw_phone)?;

        self.limiter.check_allowed(&phone, credential_key).await?.into_result()?;

        let challenge = self.provider.send_challenge(&phone, self.channel).await?;
        tracing::info!(
            phone = %phone,
            reference = %challenge.reference,
            channel = challenge.channel.as_str(),
            "Verification code sent"
        );

        let recorded = self
            .tracker
            .record_send(&phone, credential_key, &challenge.reference)
            .await
            .is_some();

        Ok(SendReceipt {
            phone,
            reference: challenge.reference,
            channel: challenge.channel,
            recorded,
        })
    }

    /// Check `code` for `raw_phone`
    pub async fn check_code(&self, raw_phone: &str, credential_key: &str, code: &str) -> Result<CheckResult> {
        let code = code.trim();
        if code.is_empty() {
            return Err(OtpError::Validation("Missing required parameter: code".into()));
        }
        if !is_otp_code(code) {
            return Err(OtpError::Validation("Verification code must be 6 digits".into()));
        }
        let phone = self.canonical_phone(raw_phone)?;

        let verdict = match self.provider.check_challenge(&phone, code).await {
            Ok(verdict) => verdict,
            Err(ProviderError::UnknownChallenge(message)) => {
                self.tracker.record_expiry(&phone, credential_key).await;
                return Err(ProviderError::UnknownChallenge(message).into());
            }
            Err(e) => return Err(e.into()),
        };

        let transition = self
            .tracker
            .record_verification(&phone, credential_key, &VerificationOutcome::from(&verdict))
            .await;
        if verdict.approved && !matches!(transition, Transition::Applied(_)) {
            tracing::debug!(phone = %phone, ?transition, "Approved without a matching live attempt");
        }

        Ok(CheckResult {
            phone,
            verified: verdict.approved,
            status: verdict.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_format() {
        assert!(is_otp_code("123456"));
        assert!(is_otp_code("000000"));
        assert!(!is_otp_code("12345"));
        assert!(!is_otp_code("1234567"));
        assert!(!is_otp_code("12a456"));
        assert!(!is_otp_code("１２３４５６"));
    }
}
