//! Mock OTP Provider
//!
//! For testing and demo purposes. Accepts a fixed code and keeps one
//! pending challenge per phone, the way Verify does.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Challenge, Channel, CheckVerdict, OtpProvider};
use crate::error::ProviderError;

#[derive(Default)]
struct State {
    pending: HashMap<String, String>,
    sent: Vec<Challenge>,
    issued: u64,
    send_failure: Option<ProviderError>,
    check_failure: Option<ProviderError>,
}

/// Mock provider with a fixed accepted code
pub struct MockOtpProvider {
    code: String,
    state: Mutex<State>,
}

impl Default for MockOtpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOtpProvider {
    pub fn new() -> Self {
        Self::with_code("123456")
    }

    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make every following send fail with `err`
    pub fn fail_sends_with(&self, err: ProviderError) {
        if let Ok(mut state) = self.state.lock() {
            state.send_failure = Some(err);
        }
    }

    /// Make every following check fail with `err`
    pub fn fail_checks_with(&self, err: ProviderError) {
        if let Ok(mut state) = self.state.lock() {
            state.check_failure = Some(err);
        }
    }

    /// Challenges sent so far
    pub fn sent(&self) -> Vec<Challenge> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }

    /// Forget the pending challenge for `phone`, as if it timed out
    pub fn expire(&self, phone: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.remove(phone);
        }
    }
}

fn poisoned<T>(_: T) -> ProviderError {
    ProviderError::Unavailable("mock provider state poisoned".into())
}

#[async_trait]
impl OtpProvider for MockOtpProvider {
    async fn send_challenge(&self, phone: &str, channel: Channel) -> Result<Challenge, ProviderError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(err) = state.send_failure.clone() {
            return Err(err);
        }

        state.issued += 1;
        let challenge = Challenge {
            reference: format!("VE{:032x}", state.issued),
            phone: phone.to_string(),
            channel,
            status: "pending".into(),
        };
        // A new send replaces the pending challenge
        state.pending.insert(phone.to_string(), challenge.reference.clone());
        state.sent.push(challenge.clone());
        Ok(challenge)
    }

    async fn check_challenge(&self, phone: &str, code: &str) -> Result<CheckVerdict, ProviderError> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(err) = state.check_failure.clone() {
            return Err(err);
        }

        let Some(reference) = state.pending.get(phone).cloned() else {
            return Err(ProviderError::UnknownChallenge(format!("no pending verification for {phone}")));
        };

        if code == self.code {
            state.pending.remove(phone);
            Ok(CheckVerdict {
                approved: true,
                status: "approved".into(),
                reference: Some(reference),
            })
        } else {
            Ok(CheckVerdict {
                approved: false,
                status: "pending".into(),
                reference: Some(reference),
            })
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_round_trip() {
        let provider = MockOtpProvider::new();
        let challenge = provider.send_challenge("+14155552671", Channel::Sms).await.unwrap();

        let wrong = provider.check_challenge("+14155552671", "000000").await.unwrap();
        assert!(!wrong.approved);

        let right = provider.check_challenge("+14155552671", "123456").await.unwrap();
        assert!(right.approved);
        assert_eq!(right.reference, Some(challenge.reference));

        // Used up
        assert!(matches!(
            provider.check_challenge("+14155552671", "123456").await,
            Err(ProviderError::UnknownChallenge(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let provider = MockOtpProvider::new();
        provider.fail_sends_with(ProviderError::InvalidDestination("landline".into()));
        assert!(matches!(
            provider.send_challenge("+442079460958", Channel::Sms).await,
            Err(ProviderError::InvalidDestination(_))
        ));
        assert!(provider.sent().is_empty());
    }
}
