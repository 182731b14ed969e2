use chrono::{Duration, Utc};
use sqlx::PgPool;
use stackyn_common::models::{BillingStatus, PlanName, Subscription};
use stackyn_common::{Error, Id};
use tracing::instrument;

use crate::notify::{NotificationEvent, Notifier};

/// Subscription/billing component. Subscription rows are the source of
/// truth for billing; the `users` row is a denormalized projection kept
/// in sync here.
#[derive(Clone)]
pub struct BillingService<N: Notifier> {
    pool: PgPool,
    notifier: N,
}

impl<N: Notifier> BillingService<N> {
    pub fn new(pool: PgPool, notifier: N) -> Self {
        Self { pool, notifier }
    }

    /// Trial creation on signup completion: plan `free_trial`, status
    /// `trial`, pro-tier resource caps for the 7-day window. Sends a
    /// "trial started" notification fire-and-forget (failure never
    /// fails signup).
    #[instrument(skip(self))]
    pub async fn start_trial(&self, user_id: Id) -> Result<Subscription, Error> {
        let now = Utc::now();
        let trial_ends_at = now + Duration::days(Subscription::TRIAL_DAYS);
        let (max_ram_mb, max_disk_gb) = Subscription::caps_for_plan(PlanName::FreeTrial);
        let id = Id::new();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO subscriptions
                (id, user_id, plan, status, trial_started_at, trial_ends_at, max_ram_mb, max_disk_gb)
             VALUES ($1, $2, $3, 'trial', $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(user_id)
        .bind(PlanName::FreeTrial)
        .bind(now)
        .bind(trial_ends_at)
        .bind(max_ram_mb)
        .bind(max_disk_gb)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users
             SET billing_status = 'trial', plan_name = $2, trial_started_at = $3,
                 trial_ends_at = $4, updated_at = now()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(PlanName::FreeTrial)
        .bind(now)
        .bind(trial_ends_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.notifier.notify(NotificationEvent::TrialStarted {
            user_id: user_id.to_string(),
        });

        Ok(Subscription {
            id,
            user_id,
            plan: PlanName::FreeTrial,
            status: BillingStatus::Trial,
            trial_started_at: Some(now),
            trial_ends_at: Some(trial_ends_at),
            max_ram_mb,
            max_disk_gb,
            external_subscription_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_for_user(&self, user_id: Id) -> Result<Option<Subscription>, Error> {
        let sub = sqlx::query_as::<_, Subscription>(
            "SELECT id, user_id, plan, status, trial_started_at, trial_ends_at,
                    max_ram_mb, max_disk_gb, external_subscription_id, created_at, updated_at
             FROM subscriptions WHERE user_id = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    /// The paywall admission predicate called by every state-mutating
    /// app endpoint.
    #[instrument(skip(self))]
    pub async fn billing_active(&self, user_id: Id) -> Result<bool, Error> {
        let row: Option<(bool, String, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
            "SELECT is_admin, billing_status, trial_ends_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((is_admin, status, trial_ends_at)) = row else {
            return Ok(false);
        };

        if is_admin {
            return Ok(true);
        }

        Ok(match status.as_str() {
            "active" => true,
            "trial" => trial_ends_at.map(|end| end > Utc::now()).unwrap_or(false),
            _ => false,
        })
    }
}
