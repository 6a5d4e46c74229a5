//! Credential Management
//!
//! API key generation, the credential record, and the storage seam used by
//! the issuer and by request metering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{BillingError, Result};
use crate::plan::Plan;

const KEY_PREFIX: &str = "pk_";
const KEY_RANDOM_BYTES: usize = 24;

/// API key (formatted: `pk_` + 48 hex chars)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Generate a new key from the thread-local CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("{KEY_PREFIX}{}", hex::encode(bytes)))
    }

    /// Wrap a caller-supplied key (e.g. from the `x-api-key` header)
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_string())
    }

    /// Whether the key has the issued format
    pub fn looks_valid(&self) -> bool {
        self.0
            .strip_prefix(KEY_PREFIX)
            .is_some_and(|rest| rest.len() == KEY_RANDOM_BYTES * 2 && rest.chars().all(|c| c.is_ascii_hexdigit()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form safe for logs
    pub fn redacted(&self) -> String {
        let visible: String = self.0.chars().take(KEY_PREFIX.len() + 4).collect();
        format!("{visible}…")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The idempotency key a credential was issued against
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SourceIdentity {
    /// Paid path: processor order id
    Order(String),
    /// Free path: lower-cased email
    Email(String),
}

impl SourceIdentity {
    pub fn order(order_id: impl Into<String>) -> Self {
        SourceIdentity::Order(order_id.into())
    }

    /// Email identities are always stored lower-cased
    pub fn email(email: &str) -> Self {
        SourceIdentity::Email(email.trim().to_lowercase())
    }
}

impl std::fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceIdentity::Order(id) => write!(f, "order:{id}"),
            SourceIdentity::Email(email) => write!(f, "email:{email}"),
        }
    }
}

/// An issued API key and its entitlement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub key: ApiKey,

    pub source: SourceIdentity,

    /// Contact email, when one was resolvable
    pub email: Option<String>,

    pub name: Option<String>,

    pub plan: Plan,

    pub requests_limit: u64,

    /// Never decreases; reset policy is handled elsewhere
    pub requests_used: u64,

    pub created_at: DateTime<Utc>,

    /// Set on the paid path only
    pub paid_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a credential for a verified order
    pub fn paid(order_id: impl Into<String>, plan: Plan, email: Option<String>, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            key: ApiKey::generate(),
            source: SourceIdentity::order(order_id),
            email,
            name,
            plan,
            requests_limit: plan.monthly_quota(),
            requests_used: 0,
            created_at: now,
            paid_at: Some(now),
        }
    }

    /// Create a free-tier credential keyed by email
    pub fn free(email: &str) -> Self {
        let normalized = email.trim().to_lowercase();
        Self {
            key: ApiKey::generate(),
            source: SourceIdentity::Email(normalized.clone()),
            email: Some(normalized),
            name: None,
            plan: Plan::Free,
            requests_limit: Plan::Free.monthly_quota(),
            requests_used: 0,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    pub fn remaining_requests(&self) -> u64 {
        self.requests_limit.saturating_sub(self.requests_used)
    }

    pub fn has_quota(&self) -> bool {
        self.requests_used < self.requests_limit
    }
}

/// Result of an insert against the store
#[derive(Clone, Debug)]
pub enum Inserted {
    /// The credential was written
    Created(Credential),
    /// The store's uniqueness constraint on the source identity kept an
    /// earlier record; that record is canonical
    Existing(Credential),
}

impl Inserted {
    pub fn credential(&self) -> &Credential {
        match self {
            Inserted::Created(c) | Inserted::Existing(c) => c,
        }
    }

    pub fn into_credential(self) -> Credential {
        match self {
            Inserted::Created(c) | Inserted::Existing(c) => c,
        }
    }
}

/// Outcome of metering a request against a key
#[derive(Clone, Debug)]
pub enum Usage {
    /// Counted; carries the updated record
    Counted(Credential),
    /// Quota already spent; nothing was counted
    Exhausted(Credential),
    /// No credential with that key
    UnknownKey,
}

/// Credential storage seam.
///
/// Only equality lookups are assumed; no compound queries.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by idempotency key. `Err` means "unknown", never "not found".
    async fn find_by_source(&self, source: &SourceIdentity) -> Result<Option<Credential>>;

    /// Look up by API key
    async fn find_by_key(&self, key: &ApiKey) -> Result<Option<Credential>>;

    /// Append a new record
    async fn insert(&self, credential: Credential) -> Result<Inserted>;

    /// Advance `requests_used` by one if quota remains
    async fn record_usage(&self, key: &ApiKey) -> Result<Usage>;
}

#[derive(Default)]
struct Tables {
    by_key: HashMap<ApiKey, Credential>,
    // Vec so the unconstrained mode can hold duplicates
    by_source: HashMap<SourceIdentity, Vec<ApiKey>>,
}

/// In-memory credential store
pub struct MemoryCredentialStore {
    tables: RwLock<Tables>,
    unique_source: bool,
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCredentialStore {
    /// Store with a uniqueness constraint on the source identity
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            unique_source: true,
        }
    }

    /// Store without the uniqueness constraint. Racing duplicate deliveries
    /// can then produce more than one credential per order.
    pub fn without_unique_source() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            unique_source: false,
        }
    }

    /// Number of records issued against `source`
    pub fn count_for_source(&self, source: &SourceIdentity) -> usize {
        self.tables
            .read()
            .map(|t| t.by_source.get(source).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.by_key.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> BillingError {
    BillingError::StorageDegraded("credential table lock poisoned".into())
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_source(&self, source: &SourceIdentity) -> Result<Option<Credential>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .by_source
            .get(source)
            .and_then(|keys| keys.first())
            .and_then(|key| tables.by_key.get(key))
            .cloned())
    }

    async fn find_by_key(&self, key: &ApiKey) -> Result<Option<Credential>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.by_key.get(key).cloned())
    }

    async fn insert(&self, credential: Credential) -> Result<Inserted> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        if self.unique_source {
            let existing = tables
                .by_source
                .get(&credential.source)
                .and_then(|keys| keys.first())
                .and_then(|key| tables.by_key.get(key))
                .cloned();
            if let Some(existing) = existing {
                return Ok(Inserted::Existing(existing));
            }
        }

        if tables.by_key.contains_key(&credential.key) {
            return Err(BillingError::StorageDegraded(format!(
                "key collision for {}",
                credential.key.redacted()
            )));
        }

        tables
            .by_source
            .entry(credential.source.clone())
            .or_default()
            .push(credential.key.clone());
        tables.by_key.insert(credential.key.clone(), credential.clone());

        Ok(Inserted::Created(credential))
    }

    async fn record_usage(&self, key: &ApiKey) -> Result<Usage> {
        let mut tables = self.tables.write().map_err(poisoned)?;

        match tables.by_key.get_mut(key) {
            Some(credential) if credential.has_quota() => {
                credential.requests_used += 1;
                Ok(Usage::Counted(credential.clone()))
            }
            Some(credential) => Ok(Usage::Exhausted(credential.clone())),
            None => Ok(Usage::UnknownKey),
        }
    }
}
