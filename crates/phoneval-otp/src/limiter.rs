//! OTP Send Rate Limiting
//!
//! Two independent sliding windows over stored send history: per phone
//! number and per credential. Each is read with equality filters only
//! (`phone = X, status = sent` and `credential = Y, status = sent`); the
//! window cut and the count happen here.
//!
//! Counts come from a plain snapshot read, so two near-simultaneous
//! requests can both see room and both proceed. The limiter is a
//! deterrent, not a hard quota.
//!
//! A failed read fails OPEN by default: the request is allowed and a
//! warning is logged. Sustained storage trouble therefore disables the
//! limiter. `StoreErrorMode::FailClosed` refuses instead.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::attempt::{AttemptFilter, AttemptStore, OtpAttempt};
use crate::error::{OtpError, Result};

/// What to do when the history read fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreErrorMode {
    /// Allow the request
    #[default]
    FailOpen,
    /// Refuse the request with `StorageDegraded`
    FailClosed,
}

/// Send limits
#[derive(Clone, Debug)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_per_phone: usize,
    pub max_per_credential: usize,
    pub on_store_error: StoreErrorMode,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(1),
            max_per_phone: 3,
            max_per_credential: 10,
            on_store_error: StoreErrorMode::FailOpen,
        }
    }
}

/// Which window refused the request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Phone,
    Credential,
}

/// Limiter verdict
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<LimitScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whole minutes, expressed in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            scope: None,
            reason: None,
            retry_after_secs: None,
        }
    }

    /// Convert a refusal into an error; `Ok(())` when allowed
    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            return Ok(());
        }
        Err(OtpError::RateLimited {
            reason: self.reason.unwrap_or_else(|| "Rate limit exceeded".into()),
            retry_after_secs: self.retry_after_secs.unwrap_or(60),
        })
    }
}

/// Minutes until `oldest` leaves the window, at least one
pub fn minutes_until_reset(oldest: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> u64 {
    let remaining_ms = (oldest + window - now).num_milliseconds().max(0);
    let minutes = u64::try_from(remaining_ms).unwrap_or(0).div_ceil(60_000);
    minutes.max(1)
}

/// Sliding-window send limiter
pub struct RateLimiter {
    store: Arc<dyn AttemptStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AttemptStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Check whether a send to `phone` for `credential_key` is permitted now
    pub async fn check_allowed(&self, phone: &str, credential_key: &str) -> Result<RateDecision> {
        self.check_allowed_at(phone, credential_key, Utc::now()).await
    }

    /// Same as [`check_allowed`](Self::check_allowed) at a fixed instant
    pub async fn check_allowed_at(
        &self,
        phone: &str,
        credential_key: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        if let Some(denied) = self
            .check_window(LimitScope::Phone, &AttemptFilter::sent_to(phone), now)
            .await?
        {
            tracing::info!(phone = %phone, "OTP send refused by per-phone limit");
            return Ok(denied);
        }

        if let Some(denied) = self
            .check_window(LimitScope::Credential, &AttemptFilter::sent_for(credential_key), now)
            .await?
        {
            tracing::info!(phone = %phone, "OTP send refused by per-credential limit");
            return Ok(denied);
        }

        Ok(RateDecision::allow())
    }

    async fn check_window(
        &self,
        scope: LimitScope,
        filter: &AttemptFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<RateDecision>> {
        let attempts = match self.store.find(filter).await {
            Ok(attempts) => attempts,
            Err(e) => {
                return match self.policy.on_store_error {
                    StoreErrorMode::FailOpen => {
                        tracing::warn!(?scope, error = %e, "Rate limit history unreadable, failing open");
                        Ok(None)
                    }
                    StoreErrorMode::FailClosed => {
                        tracing::error!(?scope, error = %e, "Rate limit history unreadable, refusing send");
                        Err(e)
                    }
                };
            }
        };

        let cutoff = now - self.policy.window;
        let recent: Vec<&OtpAttempt> = attempts.iter().filter(|a| a.created_at >= cutoff).collect();

        let limit = match scope {
            LimitScope::Phone => self.policy.max_per_phone,
            LimitScope::Credential => self.policy.max_per_credential,
        };
        if recent.len() < limit {
            return Ok(None);
        }

        let Some(oldest) = recent.iter().map(|a| a.created_at).min() else {
            return Ok(None);
        };
        let minutes = minutes_until_reset(oldest, self.policy.window, now);
        let subject = match scope {
            LimitScope::Phone => "phone number",
            LimitScope::Credential => "API key",
        };
        let per = match self.policy.window.num_minutes() {
            60 => "hour".to_string(),
            m => format!("{m} minutes"),
        };

        Ok(Some(RateDecision {
            allowed: false,
            scope: Some(scope),
            reason: Some(format!(
                "Rate limit exceeded: Maximum {limit} SMS requests per {subject} per {per}. \
                 You can try again in approximately {minutes} minute(s)."
            )),
            retry_after_secs: Some(minutes * 60),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::MemoryAttemptStore;

    async fn seeded(attempts: Vec<OtpAttempt>) -> Arc<MemoryAttemptStore> {
        let store = Arc::new(MemoryAttemptStore::new());
        for a in attempts {
            store.append(a).await.unwrap();
        }
        store
    }

    #[test]
    fn test_minutes_until_reset() {
        let now = Utc::now();
        let window = Duration::hours(1);
        assert_eq!(minutes_until_reset(now - Duration::minutes(59), window, now), 1);
        assert_eq!(minutes_until_reset(now - Duration::seconds(30), window, now), 60);
        assert_eq!(minutes_until_reset(now - Duration::minutes(10) - Duration::seconds(1), window, now), 50);
        assert_eq!(minutes_until_reset(now - Duration::hours(2), window, now), 1);
    }

    #[tokio::test]
    async fn test_reset_hint_from_oldest_attempt() {
        let now = Utc::now();
        let store = seeded(vec![
            OtpAttempt::sent_at("+1", "k", "r1", now - Duration::minutes(45)),
            OtpAttempt::sent_at("+1", "k", "r2", now - Duration::minutes(20)),
            OtpAttempt::sent_at("+1", "k", "r3", now - Duration::minutes(5)),
        ])
        .await;
        let limiter = RateLimiter::new(store, RateLimitPolicy::default());

        let decision = limiter.check_allowed_at("+1", "k", now).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.scope, Some(LimitScope::Phone));
        assert_eq!(decision.retry_after_secs, Some(15 * 60));
        assert!(decision.reason.unwrap().contains("approximately 15 minute(s)"));
    }

    #[tokio::test]
    async fn test_terminal_attempts_do_not_count() {
        let now = Utc::now();
        let mut verified = OtpAttempt::sent_at("+1", "k", "r1", now - Duration::minutes(1));
        verified.status = crate::attempt::AttemptStatus::Verified;
        let store = seeded(vec![
            verified,
            OtpAttempt::sent_at("+1", "k", "r2", now - Duration::minutes(2)),
            OtpAttempt::sent_at("+1", "k", "r3", now - Duration::minutes(3)),
        ])
        .await;
        let limiter = RateLimiter::new(store, RateLimitPolicy::default());

        assert!(limiter.check_allowed_at("+1", "k", now).await.unwrap().allowed);
    }

    #[test]
    fn test_decision_into_result() {
        assert!(RateDecision::allow().into_result().is_ok());
        let denied = RateDecision {
            allowed: false,
            scope: Some(LimitScope::Credential),
            reason: Some("slow down".into()),
            retry_after_secs: Some(120),
        };
        match denied.into_result() {
            Err(OtpError::RateLimited { reason, retry_after_secs }) => {
                assert_eq!(reason, "slow down");
                assert_eq!(retry_after_secs, 120);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
