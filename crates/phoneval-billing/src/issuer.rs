//! Idempotent Credential Issuance
//!
//! Exactly one credential per idempotency key: the order id on the paid
//! path, the lower-cased email on the free path. Every issue is a lookup
//! followed by an insert. Two deliveries racing between those steps can
//! both miss the lookup; the store's uniqueness constraint on the source
//! identity then decides which record is canonical. A store without that
//! constraint can end up with duplicates for one order.

use serde::Serialize;
use std::sync::Arc;

use crate::credential::{Credential, CredentialStore, Inserted, SourceIdentity};
use crate::error::{BillingError, Result};
use crate::event::PaymentEvent;
use crate::notify::{Notifier, WelcomeEmail};
use crate::plan::PlanCatalog;

/// What an issue call produced
#[derive(Clone, Debug, Serialize)]
pub struct IssueOutcome {
    pub credential: Credential,
    /// `false` when an earlier credential was returned
    pub created: bool,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

impl IssueOutcome {
    fn replay(credential: Credential) -> Self {
        Self {
            credential,
            created: false,
            email_sent: false,
            email_error: None,
        }
    }
}

/// Loose `local@domain.tld` check, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let last = domain.len().saturating_sub(1);
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i < last)
}

/// Issues credentials for verified payments and free signups
pub struct CredentialIssuer {
    store: Arc<dyn CredentialStore>,
    catalog: PlanCatalog,
    notifier: Arc<dyn Notifier>,
}

impl CredentialIssuer {
    pub fn new(store: Arc<dyn CredentialStore>, catalog: PlanCatalog, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            catalog,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Existing credential for an order. Storage failures propagate.
    pub async fn find_for_order(&self, order_id: &str) -> Result<Option<Credential>> {
        self.store.find_by_source(&SourceIdentity::order(order_id)).await
    }

    /// Issue a credential for a verified payment event.
    ///
    /// The caller is responsible for having verified the payment.
    pub async fn issue(&self, event: &PaymentEvent) -> Result<IssueOutcome> {
        let order_id = event
            .order_id
            .as_deref()
            .ok_or_else(|| BillingError::Validation("Order ID is required".into()))?;

        if let Some(existing) = self.find_for_order(order_id).await? {
            tracing::info!(
                order_id = %order_id,
                key = %existing.key.redacted(),
                "Order already fulfilled, returning existing key"
            );
            return Ok(IssueOutcome::replay(existing));
        }

        let plan = self.catalog.resolve_paid(event.plan_hint.as_deref());
        let credential = Credential::paid(order_id, plan, event.email.clone(), event.name.clone());

        self.persist(credential).await
    }

    /// Issue (or return) the free-tier credential for an email
    pub async fn issue_free(&self, email: &str) -> Result<IssueOutcome> {
        let email = email.trim();
        if email.is_empty() {
            return Err(BillingError::Validation("Email is required".into()));
        }
        if !is_valid_email(email) {
            return Err(BillingError::Validation("Invalid email format".into()));
        }

        let source = SourceIdentity::email(email);
        if let Some(existing) = self.store.find_by_source(&source).await? {
            tracing::info!(source = %source, "Free key already exists for email");
            return Ok(IssueOutcome::replay(existing));
        }

        self.persist(Credential::free(email)).await
    }

    async fn persist(&self, credential: Credential) -> Result<IssueOutcome> {
        let credential = match self.store.insert(credential).await? {
            Inserted::Created(credential) => credential,
            Inserted::Existing(canonical) => {
                tracing::warn!(
                    source = %canonical.source,
                    key = %canonical.key.redacted(),
                    "Concurrent issue lost to an existing record, returning it"
                );
                return Ok(IssueOutcome::replay(canonical));
            }
        };

        tracing::info!(
            source = %credential.source,
            key = %credential.key.redacted(),
            plan = %credential.plan,
            "Created new API key"
        );

        let (email_sent, email_error) = self.send_welcome(&credential).await;

        Ok(IssueOutcome {
            credential,
            created: true,
            email_sent,
            email_error,
        })
    }

    /// Best effort; never fails the issue
    async fn send_welcome(&self, credential: &Credential) -> (bool, Option<String>) {
        let Some(email) = WelcomeEmail::for_credential(credential, self.notifier.api_base_url()) else {
            tracing::debug!(source = %credential.source, "No email address, skipping welcome");
            return (false, None);
        };

        match self.notifier.send_welcome(&email).await {
            Ok(()) => {
                tracing::info!(to = %email.to, "Welcome email sent");
                (true, None)
            }
            Err(e) => {
                tracing::warn!(to = %email.to, error = %e, "Welcome email failed, key still issued");
                (false, Some(e.to_string()))
            }
        }
    }
}
