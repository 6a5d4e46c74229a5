//! # phoneval-billing
//!
//! API key issuance, payment verification and plan management for phoneval.
//!
//! ## Fulfillment Flow
//!
//! Payment notifications reach the service through three channels (our
//! capture endpoint, PayPal's webhook, and the checkout page posting the
//! order id directly). All of them funnel into the same pipeline:
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ raw payload  │──▶│ normalize  │──▶│ replay check │──▶│  verify  │
//! │ (any shape)  │   │ PaymentEvt │   │  by order id │   │ (PayPal) │
//! └──────────────┘   └────────────┘   └──────┬───────┘   └────┬─────┘
//!                                            │ existing       │ paid
//!                                            ▼                ▼
//!                                     return same key   issue + email
//! ```
//!
//! Issuance is idempotent per order id (paid) or lower-cased email (free).
//! The welcome email is best effort and never undoes an issued key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use phoneval_billing::{
//!     CredentialIssuer, DisabledNotifier, Fulfillment, MemoryCredentialStore,
//!     PayPalClient, PlanCatalog,
//! };
//! use std::sync::Arc;
//!
//! let issuer = Arc::new(CredentialIssuer::new(
//!     Arc::new(MemoryCredentialStore::new()),
//!     PlanCatalog::from_env()?,
//!     Arc::new(DisabledNotifier::new("RESEND_KEY not set")),
//! ));
//! let fulfillment = Fulfillment::new(issuer, Arc::new(PayPalClient::from_env()?));
//!
//! let outcome = fulfillment.fulfill(&webhook_body).await?;
//! println!("key: {}", outcome.credential.key);
//! ```

mod credential;
mod error;
mod event;
mod fulfillment;
mod issuer;
mod notify;
mod paypal;
mod plan;

pub use credential::{ApiKey, Credential, CredentialStore, Inserted, MemoryCredentialStore, SourceIdentity, Usage};
pub use error::{BillingError, Result};
pub use event::{normalize, OrderMetadata, PaymentEvent, PaymentPayload, DEFAULT_CUSTOMER_NAME};
pub use fulfillment::{merge_metadata, Fulfillment};
pub use issuer::{is_valid_email, CredentialIssuer, IssueOutcome};
pub use notify::{DisabledNotifier, Notifier, ResendConfig, ResendNotifier, WelcomeEmail};
pub use paypal::{
    build_order_body, CapturedOrder, CreatedOrder, OrderRequest, OrderVerification, PayPalClient, PayPalConfig,
    PayPalMode, PaymentProcessor,
};
pub use plan::{Plan, PlanCatalog};
