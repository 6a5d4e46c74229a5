//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Issuance and payment errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Bad input shape (caller's fault, not retryable)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payment processor could not be reached or refused our credentials
    #[error("Payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    /// Processor answered, but the order is not paid
    #[error("Payment rejected for order {order_id}: status {status}")]
    PaymentRejected { order_id: String, status: String },

    /// Credential store read or write failed
    #[error("Storage degraded: {0}")]
    StorageDegraded(String),

    /// Welcome email could not be dispatched
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BillingError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProcessorUnavailable(_) | BillingError::StorageDegraded(_)
        )
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "VALIDATION_ERROR",
            BillingError::ProcessorUnavailable(_) => "PROCESSOR_UNAVAILABLE",
            BillingError::PaymentRejected { .. } => "PAYMENT_REJECTED",
            BillingError::StorageDegraded(_) => "STORAGE_DEGRADED",
            BillingError::Notification(_) => "NOTIFICATION_ERROR",
            BillingError::Config(_) => "CONFIG_ERROR",
            BillingError::Json(_) => "INVALID_JSON",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BillingError::Validation(msg) => msg.clone(),
            BillingError::ProcessorUnavailable(_) => {
                "Could not reach the payment processor. Please try again shortly.".into()
            }
            BillingError::PaymentRejected { status, .. } => {
                format!("Payment not verified: order status is {status}, expected COMPLETED or APPROVED.")
            }
            BillingError::StorageDegraded(_) => {
                "Our key storage is temporarily unavailable. Please retry.".into()
            }
            BillingError::Config(_) => "Service configuration error.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::ProcessorUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(BillingError::ProcessorUnavailable("timeout".into()).is_retryable());
        assert!(BillingError::StorageDegraded("down".into()).is_retryable());
        assert!(!BillingError::Validation("bad".into()).is_retryable());
        assert!(!BillingError::PaymentRejected {
            order_id: "O-1".into(),
            status: "CREATED".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_rejection_message_names_status() {
        let err = BillingError::PaymentRejected {
            order_id: "O-1".into(),
            status: "VOIDED".into(),
        };
        assert!(err.user_message().contains("VOIDED"));
        assert_eq!(err.code(), "PAYMENT_REJECTED");
    }
}
