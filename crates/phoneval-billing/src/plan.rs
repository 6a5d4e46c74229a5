//! Plan Catalog
//!
//! Static mapping from a plan identifier to a display name, a monthly
//! request quota and a list price.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Subscription plan tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Standard,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Standard => "standard",
            Plan::Pro => "pro",
        }
    }

    /// Look up a plan by identifier; `None` for identifiers not in the catalog
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "free" => Some(Plan::Free),
            "standard" => Some(Plan::Standard),
            "pro" => Some(Plan::Pro),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Standard => "Standard",
            Plan::Pro => "Pro",
        }
    }

    /// Requests allowed per month
    pub fn monthly_quota(&self) -> u64 {
        match self {
            Plan::Free => 7,
            Plan::Standard => 1_000,
            Plan::Pro => 10_000,
        }
    }

    /// List price in USD, formatted the way the processor expects amounts
    pub fn list_price_usd(&self) -> &'static str {
        match self {
            Plan::Free => "0.00",
            Plan::Standard => "5.00",
            Plan::Pro => "10.00",
        }
    }

    /// Whether this plan can be bought through an order
    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves plan hints carried by payment events
#[derive(Clone, Debug)]
pub struct PlanCatalog {
    default_paid: Plan,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            default_paid: Plan::Standard,
        }
    }
}

impl PlanCatalog {
    pub fn new(default_paid: Plan) -> Self {
        Self { default_paid }
    }

    /// Create from `DEFAULT_PAID_PLAN` (defaults to `standard`)
    pub fn from_env() -> Result<Self> {
        match std::env::var("DEFAULT_PAID_PLAN") {
            Ok(id) => {
                let plan = Plan::from_id(&id)
                    .filter(Plan::is_paid)
                    .ok_or_else(|| BillingError::Config(format!("DEFAULT_PAID_PLAN '{id}' is not a paid plan")))?;
                Ok(Self::new(plan))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn default_paid(&self) -> Plan {
        self.default_paid
    }

    /// Resolve a plan hint for the paid path.
    ///
    /// Unknown hints, and `free` (only reachable through free signup), fall
    /// back to the configured default.
    pub fn resolve_paid(&self, hint: Option<&str>) -> Plan {
        match hint.and_then(Plan::from_id) {
            Some(plan) if plan.is_paid() => plan,
            Some(_) | None => {
                if let Some(raw) = hint {
                    tracing::debug!(plan_hint = %raw, default = %self.default_paid, "Plan hint not usable, using default");
                }
                self.default_paid
            }
        }
    }
}
