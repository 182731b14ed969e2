use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::id::Id;

use super::subscription::{BillingStatus, PlanName};

/// Billing fields mirror the user's [`Subscription`](super::Subscription)
/// row; the subscription is the source of truth, this row a denormalized
/// projection kept in sync by the billing component.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub billing_status: BillingStatus,
    pub plan_name: PlanName,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub external_subscription_id: Option<String>,
    /// An admin account bypasses the paywall predicate entirely.
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn billing_active(&self) -> bool {
        if self.is_admin {
            return true;
        }
        match self.billing_status {
            BillingStatus::Active => true,
            BillingStatus::Trial => self
                .trial_ends_at
                .map(|end| end > Utc::now())
                .unwrap_or(false),
            BillingStatus::Expired | BillingStatus::Cancelled => false,
        }
    }
}
