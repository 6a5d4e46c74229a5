//! PayPal Integration
//!
//! Order creation, capture, and authoritative status verification against
//! the PayPal Orders v2 API. Every call exchanges the service credentials
//! for a bearer token first (client-credentials grant).

use async_trait::async_trait;
use std::convert::Infallible;
use std::str::FromStr;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{BillingError, Result};
use crate::event::{CapturePayload, OrderMetadata};
use crate::plan::Plan;

const LIVE_BASE_URL: &str = "https://api-m.paypal.com";
const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
const BRAND_NAME: &str = "Phone Validation API";

/// Statuses that count as paid
const VERIFIED_STATUSES: &[&str] = &["COMPLETED", "APPROVED"];

/// Payment processor seam
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetch the order and report whether it is paid.
    ///
    /// Network and auth failures are `ProcessorUnavailable`, never
    /// `verified = false`.
    async fn verify_order(&self, order_id: &str) -> Result<OrderVerification>;

    /// Create an order carrying `{email, name, plan}` metadata
    async fn create_order(&self, request: &OrderRequest) -> Result<CreatedOrder>;

    /// Capture an approved order
    async fn capture_order(&self, order_id: &str) -> Result<CapturedOrder>;
}

/// PayPal environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayPalMode {
    Live,
    Sandbox,
}

impl PayPalMode {
    pub fn base_url(&self) -> &'static str {
        match self {
            PayPalMode::Live => LIVE_BASE_URL,
            PayPalMode::Sandbox => SANDBOX_BASE_URL,
        }
    }
}

/// Anything other than `sandbox` is live
impl FromStr for PayPalMode {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("sandbox") {
            PayPalMode::Sandbox
        } else {
            PayPalMode::Live
        })
    }
}

/// PayPal client configuration
#[derive(Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PayPalMode,
    /// Overrides the mode's base URL (tests, proxies)
    pub base_url: Option<String>,
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("client_id", &self.client_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PayPalConfig {
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("PAYPAL_CLIENT_ID")
            .map_err(|_| BillingError::Config("PAYPAL_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("PAYPAL_CLIENT_SECRET")
            .map_err(|_| BillingError::Config("PAYPAL_CLIENT_SECRET not set".into()))?;
        let mode = std::env::var("PAYPAL_MODE")
            .map(|m| m.parse().unwrap_or(PayPalMode::Live))
            .unwrap_or(PayPalMode::Live);

        Ok(Self {
            client_id,
            client_secret,
            mode,
            base_url: None,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(self.mode.base_url())
    }
}

/// Result of checking an order with the processor
#[derive(Clone, Debug, Serialize)]
pub struct OrderVerification {
    pub order_id: String,
    pub verified: bool,
    /// Raw processor status, surfaced for diagnostics
    pub status: Option<String>,
    pub order: Value,
    /// Metadata embedded at order creation, if present and well-formed
    pub metadata: Option<OrderMetadata>,
}

impl OrderVerification {
    /// Interpret an order detail document
    pub fn from_order(order_id: impl Into<String>, order: Value) -> Self {
        let status = order.get("status").and_then(Value::as_str).map(str::to_string);
        let verified = status
            .as_deref()
            .is_some_and(|s| VERIFIED_STATUSES.contains(&s));
        let metadata = serde_json::from_value::<CapturePayload>(order.clone())
            .ok()
            .and_then(|payload| payload.metadata());

        Self {
            order_id: order_id.into(),
            verified,
            status,
            order,
            metadata,
        }
    }

    /// The processor does not know this order
    pub fn not_found(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            verified: false,
            status: Some("NOT_FOUND".into()),
            order: Value::Null,
            metadata: None,
        }
    }

    pub fn status_or_unknown(&self) -> &str {
        self.status.as_deref().unwrap_or("UNKNOWN")
    }

    pub fn plan_hint(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.plan.as_deref())
    }
}

/// Request to create an order
#[derive(Clone, Debug, Deserialize)]
pub struct OrderRequest {
    pub name: String,
    pub email: String,
    #[serde(default = "default_order_plan")]
    pub plan: Plan,
    /// USD amount; defaults to the plan's list price
    #[serde(default)]
    pub amount: Option<String>,
    /// Origin used to build return/cancel URLs
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_order_plan() -> Plan {
    Plan::Pro
}

/// Result of creating an order
#[derive(Clone, Debug, Serialize)]
pub struct CreatedOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub links: Value,
}

/// Result of capturing an order; doubles as a capture payload for fulfillment
#[derive(Clone, Debug, Serialize)]
pub struct CapturedOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: Option<String>,
    pub payer: Value,
    pub purchase_units: Value,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Order ids go into URL paths
fn check_order_id(order_id: &str) -> Result<()> {
    let ok = !order_id.is_empty()
        && order_id.len() <= 64
        && order_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(BillingError::Validation(format!("Malformed order id: {order_id:?}")))
    }
}

/// 1234567 -> "1,234,567"
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Build the Orders v2 create body
pub fn build_order_body(request: &OrderRequest) -> Result<Value> {
    if request.name.trim().is_empty() || request.email.trim().is_empty() {
        return Err(BillingError::Validation("Name and email are required".into()));
    }
    if !request.plan.is_paid() {
        return Err(BillingError::Validation(format!(
            "Plan '{}' cannot be purchased",
            request.plan
        )));
    }

    let amount = request
        .amount
        .clone()
        .unwrap_or_else(|| request.plan.list_price_usd().to_string());
    let origin = request
        .origin
        .as_deref()
        .unwrap_or("http://localhost:3000")
        .trim_end_matches('/');

    let metadata = OrderMetadata {
        email: Some(request.email.trim().to_string()),
        name: Some(request.name.trim().to_string()),
        plan: Some(request.plan.as_str().to_string()),
    };

    Ok(json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "amount": { "currency_code": "USD", "value": amount },
            "description": format!(
                "{BRAND_NAME} - {} Plan ({} requests/month)",
                request.plan.display_name(),
                group_thousands(request.plan.monthly_quota())
            ),
            "custom_id": metadata.to_json(),
        }],
        "application_context": {
            "brand_name": BRAND_NAME,
            "landing_page": "NO_PREFERENCE",
            "user_action": "PAY_NOW",
            "return_url": format!("{origin}/?payment=success"),
            "cancel_url": format!("{origin}/?payment=cancelled"),
        }
    }))
}

/// PayPal REST client
pub struct PayPalClient {
    http: reqwest::Client,
    config: PayPalConfig,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(PayPalConfig::from_env()?))
    }

    pub fn mode(&self) -> PayPalMode {
        self.config.mode
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    /// Client-credentials token exchange
    async fn access_token(&self) -> Result<String> {
        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::ProcessorUnavailable(format!(
                "PayPal authentication failed: HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<Value>().await {
            Ok(body) => body
                .get("message")
                .or_else(|| body.get("name"))
                .and_then(Value::as_str)
                .map_or_else(|| format!("HTTP {status}"), str::to_string),
            Err(_) => format!("HTTP {status}"),
        }
    }
}

#[async_trait]
impl PaymentProcessor for PayPalClient {
    async fn verify_order(&self, order_id: &str) -> Result<OrderVerification> {
        check_order_id(order_id)?;
        let token = self.access_token().await?;

        let response = self
            .http
            .get(self.url(&format!("/v2/checkout/orders/{order_id}")))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!(order_id = %order_id, "PayPal does not know this order");
            return Ok(OrderVerification::not_found(order_id));
        }
        if !status.is_success() {
            let message = Self::error_message(response).await;
            tracing::error!(order_id = %order_id, %status, "PayPal order lookup failed: {}", message);
            return Err(BillingError::ProcessorUnavailable(message));
        }

        let order: Value = response.json().await?;
        let verification = OrderVerification::from_order(order_id, order);

        tracing::info!(
            order_id = %order_id,
            status = %verification.status_or_unknown(),
            verified = verification.verified,
            "Verified PayPal order"
        );

        Ok(verification)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<CreatedOrder> {
        let body = build_order_body(request)?;
        let token = self.access_token().await?;

        let mut request_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut request_id);

        let response = self
            .http
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(token)
            .header("PayPal-Request-Id", hex::encode(request_id))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let message = Self::error_message(response).await;
            return Err(BillingError::ProcessorUnavailable(format!(
                "Failed to create PayPal order: {message}"
            )));
        }

        let order: Value = response.json().await?;
        let order_id = order
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::ProcessorUnavailable("No order id returned".into()))?
            .to_string();

        tracing::info!(order_id = %order_id, plan = %request.plan, "Created PayPal order");

        Ok(CreatedOrder {
            order_id,
            links: order.get("links").cloned().unwrap_or(Value::Null),
        })
    }

    async fn capture_order(&self, order_id: &str) -> Result<CapturedOrder> {
        check_order_id(order_id)?;
        let token = self.access_token().await?;

        let response = self
            .http
            .post(self.url(&format!("/v2/checkout/orders/{order_id}/capture")))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = Self::error_message(response).await;
            // 4xx other than auth means the order itself can't be captured
            return Err(
                if status.is_client_error()
                    && status != reqwest::StatusCode::UNAUTHORIZED
                    && status != reqwest::StatusCode::FORBIDDEN
                {
                    BillingError::PaymentRejected {
                        order_id: order_id.to_string(),
                        status: message,
                    }
                } else {
                    BillingError::ProcessorUnavailable(message)
                },
            );
        }

        let captured: Value = response.json().await?;

        Ok(CapturedOrder {
            order_id: captured
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(order_id)
                .to_string(),
            status: captured.get("status").and_then(Value::as_str).map(str::to_string),
            payer: captured.get("payer").cloned().unwrap_or(Value::Null),
            purchase_units: captured.get("purchase_units").cloned().unwrap_or(Value::Null),
        })
    }
}
