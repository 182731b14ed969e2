use async_trait::async_trait;
use bollard::Docker;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use stackyn_billing::{BillingSweeper, NotificationEvent, Notifier};
use stackyn_common::{Error, Id};
use stackyn_deployer::container;
use tracing::{info, instrument, warn};

/// Tears down a single user's running footprint and marks their apps
/// `disabled`: stops all running containers for their apps, then marks
/// the apps disabled. Shared by the periodic trial sweep below and by
/// [`BillingSweeper::sweep_user`], which the billing webhook handler
/// calls synchronously on `invoice_failed` / `subscription_cancelled`.
#[derive(Clone)]
pub struct BillingCleanup {
    pool: PgPool,
    docker: Docker,
}

impl BillingCleanup {
    pub fn new(pool: PgPool, docker: Docker) -> Self {
        Self { pool, docker }
    }

    #[instrument(skip(self))]
    async fn disable_user(&self, user_id: Id) -> Result<u64, Error> {
        let app_ids: Vec<(Id,)> = sqlx::query_as("SELECT id FROM apps WHERE user_id = $1 AND status != 'disabled'")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let mut stopped = 0u64;
        for (app_id,) in &app_ids {
            let containers = container::list_by_app(&self.docker, &app_id.to_string()).await?;
            for summary in containers {
                let Some(container_id) = summary.id else { continue };
                if let Err(err) = container::stop_and_remove(&self.docker, &container_id).await {
                    warn!(error = ?err, %container_id, "failed to stop container during billing sweep");
                    continue;
                }
                stopped += 1;
            }

            sqlx::query(
                "UPDATE deployments SET status = 'stopped', updated_at = now()
                 WHERE app_id = $1 AND status = 'running'",
            )
            .bind(app_id)
            .execute(&self.pool)
            .await?;

            sqlx::query("UPDATE apps SET status = 'disabled', updated_at = now() WHERE id = $1")
                .bind(app_id)
                .execute(&self.pool)
                .await?;
        }

        Ok(stopped)
    }
}

#[async_trait]
impl BillingSweeper for BillingCleanup {
    async fn sweep_user(&self, user_id: Id) -> Result<(), Error> {
        let stopped = self.disable_user(user_id).await?;
        info!(%user_id, containers_stopped = stopped, "billing sweep disabled user's apps");
        Ok(())
    }
}

/// Counts emitted by one periodic trial-expiry sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BillingSweepReport {
    pub trials_expired: u64,
    pub apps_disabled: u64,
}

/// Periodic half of the billing sweep: finds every user whose trial has
/// lapsed (`billing_status = 'trial' AND trial_ends_at < now()`) that a
/// missed or never-sent webhook left active, disables their apps, flips
/// `billing_status` to `expired`, and fires a trial-ended notification.
/// Idempotent — a user already `expired` never matches the `WHERE`
/// clause again.
#[instrument(skip(pool, docker, notifier))]
pub async fn sweep_expired_trials<N: Notifier>(
    pool: &PgPool,
    docker: &Docker,
    notifier: &N,
) -> Result<BillingSweepReport, Error> {
    let expired: Vec<(Id,)> = sqlx::query_as(
        "SELECT id FROM users WHERE billing_status = 'trial' AND trial_ends_at < $1",
    )
    .bind(Utc::now())
    .fetch_all(pool)
    .await?;

    let mut report = BillingSweepReport::default();
    let cleanup = BillingCleanup::new(pool.clone(), docker.clone());

    for (user_id,) in expired {
        report.trials_expired += 1;

        sqlx::query("UPDATE users SET billing_status = 'expired', updated_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        sqlx::query("UPDATE subscriptions SET status = 'expired', updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;

        match cleanup.disable_user(user_id).await {
            Ok(_) => report.apps_disabled += 1,
            Err(err) => warn!(error = ?err, %user_id, "failed to disable apps for expired trial"),
        }

        notifier.notify(NotificationEvent::TrialEnded {
            user_id: user_id.to_string(),
        });
    }

    info!(
        trials_expired = report.trials_expired,
        apps_disabled = report.apps_disabled,
        "billing sweep complete"
    );

    Ok(report)
}
