//! OTP Session Tracker
//!
//! Audit log of sends and their outcomes per `(phone, credential)` lineage.
//! Only the most recent `sent` attempt of a lineage is live; older ones are
//! inert history. The provider decides whether a code is correct, so
//! nothing here ever changes the verdict returned to the caller, and
//! bookkeeping failures are logged rather than raised.

use chrono::Utc;
use std::sync::Arc;

use crate::attempt::{AttemptFilter, AttemptStatus, AttemptStore, OtpAttempt};
use crate::error::Result;
use crate::provider::CheckVerdict;

/// A provider verdict as seen by the tracker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub approved: bool,
    /// Provider reference of the checked challenge, when known
    pub provider_reference: Option<String>,
}

impl From<&CheckVerdict> for VerificationOutcome {
    fn from(verdict: &CheckVerdict) -> Self {
        Self {
            approved: verdict.approved,
            provider_reference: verdict.reference.clone(),
        }
    }
}

/// What a tracker update did
#[derive(Clone, Debug)]
pub enum Transition {
    /// The live attempt moved to a terminal state
    Applied(OtpAttempt),
    /// No `sent` attempt for the lineage
    NoLiveAttempt,
    /// The outcome names an attempt that is no longer live
    Superseded { live_reference: String },
    /// Denied outcomes leave the attempt live
    Denied,
    /// Bookkeeping failed; already logged
    StorageFailed,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

pub struct SessionTracker {
    store: Arc<dyn AttemptStore>,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self { store }
    }

    /// Record a dispatched challenge.
    ///
    /// The code has already gone out, so a storage failure is logged and
    /// `None` returned.
    pub async fn record_send(&self, phone: &str, credential_key: &str, provider_reference: &str) -> Option<OtpAttempt> {
        let attempt = OtpAttempt::sent(phone, credential_key, provider_reference);
        match self.store.append(attempt.clone()).await {
            Ok(()) => {
                tracing::info!(phone = %phone, reference = %provider_reference, "OTP attempt recorded");
                Some(attempt)
            }
            Err(e) => {
                tracing::warn!(phone = %phone, reference = %provider_reference, error = %e, "OTP attempt not recorded, code was sent");
                None
            }
        }
    }

    /// Most recent live attempt of a lineage
    pub async fn live_attempt(&self, phone: &str, credential_key: &str) -> Result<Option<OtpAttempt>> {
        let attempts = self.store.find(&AttemptFilter::lineage(phone, credential_key)).await?;
        Ok(attempts.into_iter().max_by_key(|a| a.created_at))
    }

    /// Apply a provider verdict to the live attempt
    pub async fn record_verification(
        &self,
        phone: &str,
        credential_key: &str,
        outcome: &VerificationOutcome,
    ) -> Transition {
        if !outcome.approved {
            return Transition::Denied;
        }
        self.transition(phone, credential_key, AttemptStatus::Verified, outcome.provider_reference.as_deref())
            .await
    }

    /// The provider no longer knows the challenge; retire the live attempt
    pub async fn record_expiry(&self, phone: &str, credential_key: &str) -> Transition {
        self.transition(phone, credential_key, AttemptStatus::Expired, None).await
    }

    async fn transition(
        &self,
        phone: &str,
        credential_key: &str,
        status: AttemptStatus,
        reference: Option<&str>,
    ) -> Transition {
        let live = match self.live_attempt(phone, credential_key).await {
            Ok(Some(live)) => live,
            Ok(None) => {
                tracing::debug!(phone = %phone, ?status, "No live OTP attempt to transition");
                return Transition::NoLiveAttempt;
            }
            Err(e) => {
                tracing::warn!(phone = %phone, ?status, error = %e, "OTP attempt lookup failed");
                return Transition::StorageFailed;
            }
        };

        if reference.is_some_and(|r| r != live.provider_reference) {
            tracing::info!(
                phone = %phone,
                reference = ?reference,
                live = %live.provider_reference,
                "Verdict for a superseded OTP attempt"
            );
            return Transition::Superseded {
                live_reference: live.provider_reference,
            };
        }

        let now = Utc::now();
        match self.store.update_status(live.id, status, now).await {
            Ok(true) => {
                tracing::info!(phone = %phone, reference = %live.provider_reference, ?status, "OTP attempt transitioned");
                Transition::Applied(OtpAttempt {
                    status,
                    verified_at: (status == AttemptStatus::Verified).then_some(now),
                    ..live
                })
            }
            Ok(false) => Transition::NoLiveAttempt,
            Err(e) => {
                tracing::warn!(phone = %phone, ?status, error = %e, "OTP attempt status update failed");
                Transition::StorageFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::MemoryAttemptStore;

    fn approved(reference: &str) -> VerificationOutcome {
        VerificationOutcome {
            approved: true,
            provider_reference: Some(reference.into()),
        }
    }

    #[tokio::test]
    async fn test_denied_leaves_attempt_live() {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = SessionTracker::new(store.clone());
        tracker.record_send("+1", "k", "ref1").await.unwrap();

        let outcome = VerificationOutcome {
            approved: false,
            provider_reference: Some("ref1".into()),
        };
        assert!(matches!(tracker.record_verification("+1", "k", &outcome).await, Transition::Denied));
        assert_eq!(store.snapshot()[0].status, AttemptStatus::Sent);
    }

    #[tokio::test]
    async fn test_no_live_attempt_is_noop() {
        let tracker = SessionTracker::new(Arc::new(MemoryAttemptStore::new()));
        assert!(matches!(
            tracker.record_verification("+1", "k", &approved("ref1")).await,
            Transition::NoLiveAttempt
        ));
        assert!(matches!(tracker.record_expiry("+1", "k").await, Transition::NoLiveAttempt));
    }

    #[tokio::test]
    async fn test_lineage_is_phone_and_credential() {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = SessionTracker::new(store.clone());
        tracker.record_send("+1", "other-key", "ref1").await.unwrap();

        assert!(matches!(
            tracker.record_verification("+1", "k", &approved("ref1")).await,
            Transition::NoLiveAttempt
        ));
        assert_eq!(store.snapshot()[0].status, AttemptStatus::Sent);
    }

    #[tokio::test]
    async fn test_expiry_retires_live_attempt() {
        let store = Arc::new(MemoryAttemptStore::new());
        let tracker = SessionTracker::new(store.clone());
        tracker.record_send("+1", "k", "ref1").await.unwrap();

        match tracker.record_expiry("+1", "k").await {
            Transition::Applied(a) => {
                assert_eq!(a.status, AttemptStatus::Expired);
                assert!(a.verified_at.is_none());
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert!(tracker.live_attempt("+1", "k").await.unwrap().is_none());
    }
}
