//! OTP Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, OtpError>;

/// Errors reported by the OTP provider, classified from its error codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No pending challenge for this destination (never sent, expired, or used up)
    #[error("Verification not found: {0}")]
    UnknownChallenge(String),

    #[error("Provider rate limit: {0}")]
    RateLimited(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Bad credentials or unknown service id
    #[error("Provider misconfigured: {0}")]
    AuthMisconfigured(String),

    /// Transport failure or provider 5xx
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider error {code}: {message}")]
    Other { code: i64, message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Unavailable(err.to_string())
    }
}

/// OTP flow errors
#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local send policy refused the request
    #[error("Rate limited: {reason}")]
    RateLimited { reason: String, retry_after_secs: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Storage degraded: {0}")]
    StorageDegraded(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OtpError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            OtpError::RateLimited { .. } | OtpError::StorageDegraded(_) => true,
            OtpError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            OtpError::Validation(msg) | OtpError::RateLimited { reason: msg, .. } => msg.clone(),
            OtpError::Provider(ProviderError::UnknownChallenge(_)) => {
                "No verification request found for this phone number. Please request a new code.".into()
            }
            OtpError::Provider(ProviderError::RateLimited(_)) => {
                "Too many verification requests. Please try again later.".into()
            }
            OtpError::Provider(ProviderError::InvalidDestination(_)) => {
                "The phone number provided is not valid for SMS delivery.".into()
            }
            OtpError::Provider(ProviderError::Unavailable(_)) => {
                "The verification service is temporarily unavailable.".into()
            }
            OtpError::StorageDegraded(_) => "Verification bookkeeping is temporarily unavailable.".into(),
            _ => "Failed to process the verification request.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(OtpError::Provider(ProviderError::Unavailable("503".into())).is_retryable());
        assert!(!OtpError::Provider(ProviderError::InvalidDestination("x".into())).is_retryable());
        assert!(!OtpError::Validation("bad".into()).is_retryable());
        assert!(OtpError::RateLimited {
            reason: "slow down".into(),
            retry_after_secs: 60
        }
        .is_retryable());
    }

    #[test]
    fn test_rate_limit_message_passes_through() {
        let err = OtpError::RateLimited {
            reason: "try again in 5 minute(s)".into(),
            retry_after_secs: 300,
        };
        assert_eq!(err.user_message(), "try again in 5 minute(s)");
    }
}
