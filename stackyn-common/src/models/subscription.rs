use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BillingStatus {
    Trial,
    Active,
    Expired,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PlanName {
    FreeTrial,
    Starter,
    Pro,
}

/// Source of truth for billing state. At most one `active`-or-`trial`
/// subscription per user; enforced in storage by a partial unique index
/// over `(user_id) WHERE status IN ('active', 'trial')`.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Id,
    pub user_id: Id,
    pub plan: PlanName,
    pub status: BillingStatus,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub max_ram_mb: i32,
    pub max_disk_gb: i32,
    pub external_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Resource caps granted to a brand-new 7-day trial: equal to the
    /// pro-plan caps for the trial window.
    pub const TRIAL_RAM_MB: i32 = 4096;
    pub const TRIAL_DISK_GB: i32 = 20;
    pub const TRIAL_DAYS: i64 = 7;

    pub const STARTER_RAM_MB: i32 = 1024;
    pub const STARTER_DISK_GB: i32 = 5;
    pub const PRO_RAM_MB: i32 = 4096;
    pub const PRO_DISK_GB: i32 = 20;

    pub fn caps_for_plan(plan: PlanName) -> (i32, i32) {
        match plan {
            PlanName::FreeTrial => (Self::TRIAL_RAM_MB, Self::TRIAL_DISK_GB),
            PlanName::Starter => (Self::STARTER_RAM_MB, Self::STARTER_DISK_GB),
            PlanName::Pro => (Self::PRO_RAM_MB, Self::PRO_DISK_GB),
        }
    }

    /// Concurrent-builds-per-user plan cap, chosen in proportion to the RAM
    /// caps above (see DESIGN.md Open Question resolution).
    pub fn max_concurrent_builds(plan: PlanName) -> i64 {
        match plan {
            PlanName::FreeTrial => 2,
            PlanName::Starter => 2,
            PlanName::Pro => 5,
        }
    }

    /// Per-user app count plan cap, read by admission alongside RAM.
    pub fn max_apps(plan: PlanName) -> i64 {
        match plan {
            PlanName::FreeTrial => 3,
            PlanName::Starter => 5,
            PlanName::Pro => 20,
        }
    }
}
