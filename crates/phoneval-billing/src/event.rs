//! Payment Event Normalization
//!
//! Inbound payment notifications arrive in several shapes: the order
//! capture response, PayPal's asynchronous webhook envelope, and a flat
//! `{orderId, email, name, plan}` object posted by our own checkout page.
//! Each is classified into a [`PaymentPayload`] tag and normalized into a
//! single [`PaymentEvent`]. Normalization is pure and never fails; an
//! unrecognized payload yields an event without an order id, which callers
//! must reject.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Fallback display name when a payload carries none
pub const DEFAULT_CUSTOMER_NAME: &str = "Customer";

/// Webhook event types that represent money actually moving
const ACCEPTED_EVENT_TYPES: &[&str] = &[
    "CHECKOUT.ORDER.APPROVED",
    "CHECKOUT.ORDER.COMPLETED",
    "PAYMENT.CAPTURE.COMPLETED",
];

/// Canonical, shape-independent payment notification
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub order_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan_hint: Option<String>,
}

/// `{email, name, plan}` round-tripped through the order's `custom_id`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

impl OrderMetadata {
    /// Parse an embedded metadata blob. Malformed JSON is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed order metadata");
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        // Three optional strings always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A field of the wrong type reads as absent instead of failing its shape
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Array elements that do not decode are dropped; a non-array is empty
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect(),
        _ => Vec::new(),
    })
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PayerName {
    #[serde(default, deserialize_with = "lenient")]
    pub given_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub surname: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Payer {
    #[serde(default, deserialize_with = "lenient")]
    pub email_address: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<PayerName>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Payee {
    #[serde(default, deserialize_with = "lenient")]
    pub email_address: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PurchaseUnit {
    #[serde(default, deserialize_with = "lenient")]
    pub custom_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub payee: Option<Payee>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelatedIds {
    #[serde(default, deserialize_with = "lenient")]
    pub order_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SupplementaryData {
    #[serde(default, deserialize_with = "lenient")]
    pub related_ids: Option<RelatedIds>,
}

/// Purchase-unit + payer structure (order detail, capture response, or
/// webhook resource)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CapturePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// Our capture endpoint reports the order id under this name
    #[serde(default, rename = "orderId", deserialize_with = "lenient")]
    pub order_id: Option<String>,
    /// Capture resources carry the metadata blob at the top level
    #[serde(default, deserialize_with = "lenient")]
    pub custom_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub purchase_units: Vec<PurchaseUnit>,
    #[serde(default, deserialize_with = "lenient")]
    pub payer: Option<Payer>,
    #[serde(default, deserialize_with = "lenient")]
    pub supplementary_data: Option<SupplementaryData>,
}

/// Asynchronous webhook delivery
#[derive(Clone, Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub resource: CapturePayload,
}

/// Flat shape posted by our checkout page
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DirectPayload {
    #[serde(default, rename = "orderId", deserialize_with = "lenient")]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub plan: Option<String>,
}

/// Recognized inbound payload shapes
#[derive(Clone, Debug)]
pub enum PaymentPayload {
    Capture(CapturePayload),
    Webhook(WebhookEnvelope),
    Direct(DirectPayload),
    Unrecognized,
}

impl PaymentPayload {
    /// Sniff the shape of a raw JSON payload
    pub fn classify(raw: &Value) -> Self {
        let Some(object) = raw.as_object() else {
            return PaymentPayload::Unrecognized;
        };

        let parsed = if object.contains_key("event_type") && object.contains_key("resource") {
            serde_json::from_value(raw.clone()).map(PaymentPayload::Webhook)
        } else if object.contains_key("purchase_units") || object.contains_key("payer") {
            serde_json::from_value(raw.clone()).map(PaymentPayload::Capture)
        } else if object.contains_key("orderId") {
            serde_json::from_value(raw.clone()).map(PaymentPayload::Direct)
        } else {
            return PaymentPayload::Unrecognized;
        };

        parsed.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Payment payload did not match its sniffed shape");
            PaymentPayload::Unrecognized
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentPayload::Capture(_) => "capture",
            PaymentPayload::Webhook(_) => "webhook",
            PaymentPayload::Direct(_) => "direct",
            PaymentPayload::Unrecognized => "unrecognized",
        }
    }

    pub fn normalize(&self) -> PaymentEvent {
        match self {
            PaymentPayload::Capture(capture) => capture.to_event(capture.order_id.as_ref().or(capture.id.as_ref())),
            PaymentPayload::Webhook(envelope) => envelope.to_event(),
            PaymentPayload::Direct(direct) => direct.to_event(),
            PaymentPayload::Unrecognized => PaymentEvent::default(),
        }
    }
}

/// Normalize any raw payment payload
pub fn normalize(raw: &Value) -> PaymentEvent {
    PaymentPayload::classify(raw).normalize()
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

impl CapturePayload {
    /// Embedded metadata from the first purchase unit, else the resource itself
    pub fn metadata(&self) -> Option<OrderMetadata> {
        self.purchase_units
            .first()
            .and_then(|unit| unit.custom_id.as_deref())
            .or(self.custom_id.as_deref())
            .and_then(OrderMetadata::parse)
    }

    fn payer_name(&self) -> Option<String> {
        let name = self.payer.as_ref()?.name.as_ref()?;
        let full = format!(
            "{} {}",
            name.given_name.as_deref().unwrap_or_default(),
            name.surname.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        (!full.is_empty()).then(|| full.to_string())
    }

    fn to_event(&self, order_id: Option<&String>) -> PaymentEvent {
        let meta = self.metadata().unwrap_or_default();

        let email = non_empty(meta.email.as_ref())
            .or_else(|| non_empty(self.payer.as_ref().and_then(|p| p.email_address.as_ref())))
            .or_else(|| {
                non_empty(
                    self.purchase_units
                        .first()
                        .and_then(|u| u.payee.as_ref())
                        .and_then(|p| p.email_address.as_ref()),
                )
            });

        let name = non_empty(meta.name.as_ref())
            .or_else(|| self.payer_name())
            .unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string());

        PaymentEvent {
            order_id: non_empty(order_id),
            email,
            name: Some(name),
            plan_hint: non_empty(meta.plan.as_ref()),
        }
    }
}

impl WebhookEnvelope {
    pub fn is_accepted(&self) -> bool {
        ACCEPTED_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    fn to_event(&self) -> PaymentEvent {
        if !self.is_accepted() {
            tracing::debug!(event_type = %self.event_type, "Ignoring webhook event type");
            return PaymentEvent::default();
        }

        // Capture resources point back at their order
        let related_order = self
            .resource
            .supplementary_data
            .as_ref()
            .and_then(|s| s.related_ids.as_ref())
            .and_then(|r| r.order_id.as_ref());

        let order_id = if self.event_type.starts_with("PAYMENT.CAPTURE") {
            related_order.or(self.resource.id.as_ref())
        } else {
            self.resource.id.as_ref()
        };

        self.resource.to_event(order_id)
    }
}

impl DirectPayload {
    fn to_event(&self) -> PaymentEvent {
        PaymentEvent {
            order_id: non_empty(self.order_id.as_ref()),
            email: non_empty(self.email.as_ref()),
            name: Some(non_empty(self.name.as_ref()).unwrap_or_else(|| DEFAULT_CUSTOMER_NAME.to_string())),
            plan_hint: non_empty(self.plan.as_ref()),
        }
    }
}
