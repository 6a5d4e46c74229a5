//! OTP Provider Integration
//!
//! The provider owns code generation and code correctness. This side only
//! asks it to send a challenge and to check a submitted code.

mod mock;
mod twilio;

pub use mock::MockOtpProvider;
pub use twilio::{classify_error, Operation, TwilioConfig, TwilioVerifyClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Delivery channel for a challenge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Sms,
    Call,
    Whatsapp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Call => "call",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

/// A dispatched challenge
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Challenge {
    /// Provider-assigned id for this attempt
    pub reference: String,
    pub phone: String,
    pub channel: Channel,
    pub status: String,
}

/// The provider's verdict on a submitted code
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckVerdict {
    pub approved: bool,
    pub status: String,
    /// Which challenge was checked, when the provider says
    pub reference: Option<String>,
}

/// OTP provider trait
///
/// Implement this for each provider; Twilio Verify is the production one.
#[async_trait]
pub trait OtpProvider: Send + Sync {
    /// Send a new challenge to an E.164 number
    async fn send_challenge(&self, phone: &str, channel: Channel) -> Result<Challenge, ProviderError>;

    /// Check a submitted code against the pending challenge for `phone`
    async fn check_challenge(&self, phone: &str, code: &str) -> Result<CheckVerdict, ProviderError>;

    /// Provider name
    fn name(&self) -> &str;
}
