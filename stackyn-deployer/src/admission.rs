use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use stackyn_common::models::Subscription;
use stackyn_common::{Error, ErrorKind, Id};
use tokio::sync::Mutex;
use tracing::instrument;

/// Per-user RAM-in-use accounting, kept as a soft in-memory cache
/// guarded by a mutex. The ground truth is a reducer query over
/// `running` deployments in the database; this cache
/// exists purely to avoid that query on the hot admission path and is
/// reconciled from the database on first touch per user and at process
/// start via [`RamCache::reconcile_all`].
#[derive(Clone)]
pub struct RamCache {
    pool: PgPool,
    in_use: Arc<Mutex<HashMap<Id, i64>>>,
}

impl RamCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            in_use: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Repopulates the whole cache from `SELECT SUM(ram_mb)` over
    /// `running` deployments, run once at process start.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<(), Error> {
        let rows: Vec<(Id, i64)> = sqlx::query_as(
            "SELECT a.user_id, coalesce(sum(a.ram_mb), 0)
             FROM apps a
             JOIN deployments d ON d.app_id = a.id AND d.status = 'running'
             GROUP BY a.user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut guard = self.in_use.lock().await;
        guard.clear();
        for (user_id, ram_mb) in rows {
            guard.insert(user_id, ram_mb);
        }
        Ok(())
    }

    async fn reconcile_user(&self, user_id: Id) -> Result<i64, Error> {
        let (ram_mb,): (i64,) = sqlx::query_as(
            "SELECT coalesce(sum(a.ram_mb), 0)
             FROM apps a
             JOIN deployments d ON d.app_id = a.id AND d.status = 'running'
             WHERE a.user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        self.in_use.lock().await.insert(user_id, ram_mb);
        Ok(ram_mb)
    }

    pub async fn current(&self, user_id: Id) -> Result<i64, Error> {
        if let Some(ram_mb) = self.in_use.lock().await.get(&user_id).copied() {
            return Ok(ram_mb);
        }
        self.reconcile_user(user_id).await
    }

    pub async fn increment(&self, user_id: Id, ram_mb: i32) {
        let mut guard = self.in_use.lock().await;
        *guard.entry(user_id).or_insert(0) += ram_mb as i64;
    }

    pub async fn decrement(&self, user_id: Id, ram_mb: i32) {
        let mut guard = self.in_use.lock().await;
        let entry = guard.entry(user_id).or_insert(0);
        *entry = (*entry - ram_mb as i64).max(0);
    }
}

/// Deploy-step admission: re-verify billing is `active` or `trial` with
/// a future end, then check the per-user RAM
/// sum (including this deployment's requested RAM) against the
/// subscription's RAM cap. On success, increments the cache; callers
/// must [`RamCache::decrement`] on deployment exit or failure.
#[instrument(skip(pool, ram_cache))]
pub async fn admit(
    pool: &PgPool,
    ram_cache: &RamCache,
    user_id: Id,
    requested_ram_mb: i32,
) -> Result<(), Error> {
    let row: Option<(bool, String, Option<chrono::DateTime<chrono::Utc>>)> = sqlx::query_as(
        "SELECT is_admin, billing_status, trial_ends_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some((is_admin, billing_status, trial_ends_at)) = row else {
        return Err(Error::new(ErrorKind::InternalPlatformError, "deploying user not found"));
    };

    let billing_active = is_admin
        || billing_status == "active"
        || (billing_status == "trial"
            && trial_ends_at.map(|end| end > chrono::Utc::now()).unwrap_or(false));

    if !billing_active {
        return Err(Error::new(
            ErrorKind::BillingInactive,
            "owner's billing is not active",
        ));
    }

    let subscription: Option<(i32,)> = sqlx::query_as(
        "SELECT max_ram_mb FROM subscriptions WHERE user_id = $1 AND status IN ('active', 'trial')
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let max_ram_mb = subscription
        .map(|(ram,)| ram as i64)
        .unwrap_or_else(|| Subscription::caps_for_plan(stackyn_common::models::PlanName::FreeTrial).0 as i64);

    let current = ram_cache.current(user_id).await?;
    if current + requested_ram_mb as i64 > max_ram_mb {
        return Err(Error::new(
            ErrorKind::PlanLimitExceeded,
            "deploying this app would exceed the plan's RAM cap",
        ));
    }

    ram_cache.increment(user_id, requested_ram_mb).await;
    Ok(())
}
