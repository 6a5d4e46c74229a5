//! OTP Attempt Records
//!
//! Append-only history of sends. Stores are only expected to answer
//! equality filters; time windows and ordering are applied by callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{OtpError, Result};

/// Attempt lifecycle: `Sent` is live, the others are terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Sent,
    Verified,
    Expired,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Sent)
    }
}

/// One challenge send
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpAttempt {
    pub id: Uuid,
    /// E.164
    pub phone: String,
    pub credential_key: String,
    pub provider_reference: String,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl OtpAttempt {
    pub fn sent(phone: impl Into<String>, credential_key: impl Into<String>, provider_reference: impl Into<String>) -> Self {
        Self::sent_at(phone, credential_key, provider_reference, Utc::now())
    }

    pub fn sent_at(
        phone: impl Into<String>,
        credential_key: impl Into<String>,
        provider_reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            credential_key: credential_key.into(),
            provider_reference: provider_reference.into(),
            status: AttemptStatus::Sent,
            created_at,
            verified_at: None,
        }
    }
}

/// Conjunction of equality filters; `None` fields match anything
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptFilter {
    pub phone: Option<String>,
    pub credential_key: Option<String>,
    pub status: Option<AttemptStatus>,
}

impl AttemptFilter {
    pub fn sent_to(phone: &str) -> Self {
        Self {
            phone: Some(phone.to_string()),
            status: Some(AttemptStatus::Sent),
            ..Self::default()
        }
    }

    pub fn sent_for(credential_key: &str) -> Self {
        Self {
            credential_key: Some(credential_key.to_string()),
            status: Some(AttemptStatus::Sent),
            ..Self::default()
        }
    }

    /// Live attempts of one `(phone, credential)` lineage
    pub fn lineage(phone: &str, credential_key: &str) -> Self {
        Self {
            phone: Some(phone.to_string()),
            credential_key: Some(credential_key.to_string()),
            status: Some(AttemptStatus::Sent),
        }
    }

    pub fn matches(&self, attempt: &OtpAttempt) -> bool {
        self.phone.as_ref().is_none_or(|p| *p == attempt.phone)
            && self
                .credential_key
                .as_ref()
                .is_none_or(|k| *k == attempt.credential_key)
            && self.status.is_none_or(|s| s == attempt.status)
    }
}

/// Attempt storage seam
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// All attempts matching the filter, in no particular order
    async fn find(&self, filter: &AttemptFilter) -> Result<Vec<OtpAttempt>>;

    async fn append(&self, attempt: OtpAttempt) -> Result<()>;

    /// Set the status of one attempt; `false` if the id is unknown
    async fn update_status(&self, id: Uuid, status: AttemptStatus, at: DateTime<Utc>) -> Result<bool>;
}

/// In-memory attempt store
#[derive(Default)]
pub struct MemoryAttemptStore {
    attempts: RwLock<Vec<OtpAttempt>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt, for inspection
    pub fn snapshot(&self) -> Vec<OtpAttempt> {
        self.attempts.read().map(|a| a.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> OtpError {
    OtpError::StorageDegraded("attempt table lock poisoned".into())
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn find(&self, filter: &AttemptFilter) -> Result<Vec<OtpAttempt>> {
        let attempts = self.attempts.read().map_err(poisoned)?;
        Ok(attempts.iter().filter(|a| filter.matches(a)).cloned().collect())
    }

    async fn append(&self, attempt: OtpAttempt) -> Result<()> {
        self.attempts.write().map_err(poisoned)?.push(attempt);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: AttemptStatus, at: DateTime<Utc>) -> Result<bool> {
        let mut attempts = self.attempts.write().map_err(poisoned)?;
        let Some(attempt) = attempts.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        attempt.status = status;
        attempt.verified_at = (status == AttemptStatus::Verified).then_some(at);
        Ok(true)
    }
}
