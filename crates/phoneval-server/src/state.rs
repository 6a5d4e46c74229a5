//! Application State

use std::sync::Arc;

use phoneval_billing::{CredentialIssuer, CredentialStore, Fulfillment};
use phoneval_otp::{PhoneParser, VerificationFlow};

use crate::throttle::DemoRateLimiter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Credential store, also used for request metering
    pub credentials: Arc<dyn CredentialStore>,

    /// Free and paid key issuance
    pub issuer: Arc<CredentialIssuer>,

    /// PayPal fulfillment (optional - None if not configured)
    pub payments: Option<Arc<Fulfillment>>,

    /// OTP send/check (optional - None if Twilio is not configured)
    pub otp: Option<Arc<VerificationFlow>>,

    pub parser: Arc<dyn PhoneParser>,

    /// Throttle for the unauthenticated demo endpoint
    pub demo_limiter: DemoRateLimiter,
}
