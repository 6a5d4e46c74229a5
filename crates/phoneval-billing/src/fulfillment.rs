//! Payment Fulfillment
//!
//! Turns an inbound payment notification into an issued credential:
//! normalize, replay check, verify with the processor, merge the order's
//! embedded metadata, issue. The replay check runs before verification so
//! duplicate deliveries never hit the processor.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{BillingError, Result};
use crate::event::{PaymentEvent, PaymentPayload, DEFAULT_CUSTOMER_NAME};
use crate::issuer::{CredentialIssuer, IssueOutcome};
use crate::paypal::{OrderVerification, PaymentProcessor};

/// Fulfills payment notifications from any inbound channel
pub struct Fulfillment {
    issuer: Arc<CredentialIssuer>,
    processor: Arc<dyn PaymentProcessor>,
}

impl Fulfillment {
    pub fn new(issuer: Arc<CredentialIssuer>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { issuer, processor }
    }

    pub fn processor(&self) -> &Arc<dyn PaymentProcessor> {
        &self.processor
    }

    /// Fulfill a raw notification body
    pub async fn fulfill(&self, raw: &Value) -> Result<IssueOutcome> {
        let payload = PaymentPayload::classify(raw);
        let event = payload.normalize();

        let Some(order_id) = event.order_id.clone() else {
            tracing::warn!(shape = payload.kind(), "Payment notification without order id");
            return Err(BillingError::Validation("Order ID is required".into()));
        };

        tracing::info!(order_id = %order_id, shape = payload.kind(), "Processing payment notification");

        if let Some(existing) = self.issuer.find_for_order(&order_id).await? {
            tracing::info!(order_id = %order_id, "Replayed notification, skipping verification");
            return Ok(IssueOutcome {
                credential: existing,
                created: false,
                email_sent: false,
                email_error: None,
            });
        }

        let verification = self.processor.verify_order(&order_id).await?;
        if !verification.verified {
            tracing::warn!(
                order_id = %order_id,
                status = %verification.status_or_unknown(),
                "Payment not verified"
            );
            return Err(BillingError::PaymentRejected {
                order_id,
                status: verification.status_or_unknown().to_string(),
            });
        }

        let event = merge_metadata(event, &verification);
        self.issuer.issue(&event).await
    }
}

/// Combine the notification with what the processor knows.
///
/// The plan embedded at order creation beats a plan hint in the payload;
/// contact details from the payload beat the embedded ones.
pub fn merge_metadata(event: PaymentEvent, verification: &OrderVerification) -> PaymentEvent {
    let Some(meta) = verification.metadata.as_ref() else {
        return event;
    };

    let name = match event.name {
        Some(n) if n != DEFAULT_CUSTOMER_NAME => Some(n),
        fallback => meta.name.clone().filter(|n| !n.trim().is_empty()).or(fallback),
    };

    PaymentEvent {
        order_id: event.order_id,
        email: event.email.or_else(|| meta.email.clone()),
        name,
        plan_hint: meta.plan.clone().or(event.plan_hint),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verification(custom_id: &str) -> OrderVerification {
        OrderVerification::from_order(
            "O-1",
            json!({
                "id": "O-1",
                "status": "COMPLETED",
                "purchase_units": [{ "custom_id": custom_id }]
            }),
        )
    }

    #[test]
    fn test_metadata_plan_wins() {
        let event = PaymentEvent {
            order_id: Some("O-1".into()),
            email: Some("payer@example.com".into()),
            name: Some("Payer".into()),
            plan_hint: Some("standard".into()),
        };
        let merged = merge_metadata(
            event,
            &verification(r#"{"email":"meta@example.com","name":"Meta","plan":"pro"}"#),
        );

        assert_eq!(merged.plan_hint.as_deref(), Some("pro"));
        assert_eq!(merged.email.as_deref(), Some("payer@example.com"));
        assert_eq!(merged.name.as_deref(), Some("Payer"));
    }

    #[test]
    fn test_metadata_fills_gaps() {
        let event = PaymentEvent {
            order_id: Some("O-1".into()),
            email: None,
            name: Some(DEFAULT_CUSTOMER_NAME.into()),
            plan_hint: None,
        };
        let merged = merge_metadata(
            event,
            &verification(r#"{"email":"meta@example.com","name":"Meta"}"#),
        );

        assert_eq!(merged.email.as_deref(), Some("meta@example.com"));
        assert_eq!(merged.name.as_deref(), Some("Meta"));
        assert_eq!(merged.plan_hint, None);
    }

    #[test]
    fn test_no_metadata_passes_through() {
        let event = PaymentEvent {
            order_id: Some("O-1".into()),
            plan_hint: Some("pro".into()),
            ..PaymentEvent::default()
        };
        let merged = merge_metadata(event.clone(), &OrderVerification::not_found("O-1"));
        assert_eq!(merged, event);
    }
}
