//! # phoneval-otp
//!
//! Phone number parsing and one-time-passcode verification for phoneval.
//!
//! ## Send Path
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ parse to  │──▶│ rate limit   │──▶│ provider     │──▶│ record sent  │
//! │ E.164     │   │ phone + key  │   │ send         │   │ (best effort)│
//! └───────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! The provider generates and checks codes. This crate owns the send
//! quota and the audit history of attempts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use phoneval_otp::{E164Parser, MemoryAttemptStore, RateLimitPolicy, TwilioVerifyClient, VerificationFlow};
//! use std::sync::Arc;
//!
//! let flow = VerificationFlow::new(
//!     Arc::new(E164Parser::new()),
//!     Arc::new(TwilioVerifyClient::from_env()?),
//!     Arc::new(MemoryAttemptStore::new()),
//!     RateLimitPolicy::default(),
//! );
//!
//! let receipt = flow.send_code("+14155552671", api_key).await?;
//! let result = flow.check_code("+14155552671", api_key, "123456").await?;
//! ```

mod attempt;
mod error;
mod flow;
mod limiter;
mod phone;
mod provider;
mod tracker;

pub use attempt::{AttemptFilter, AttemptStatus, AttemptStore, MemoryAttemptStore, OtpAttempt};
pub use error::{OtpError, ProviderError, Result};
pub use flow::{is_otp_code, CheckResult, SendReceipt, VerificationFlow};
pub use limiter::{minutes_until_reset, LimitScope, RateDecision, RateLimitPolicy, RateLimiter, StoreErrorMode};
pub use phone::{E164Parser, LineType, ParsedPhone, PhoneParser, DEFAULT_REGION};
pub use provider::{
    classify_error, Challenge, Channel, CheckVerdict, MockOtpProvider, Operation, OtpProvider, TwilioConfig,
    TwilioVerifyClient,
};
pub use tracker::{SessionTracker, Transition, VerificationOutcome};
