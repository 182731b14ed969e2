use async_trait::async_trait;
use hex::ToHex;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use stackyn_common::models::PlanName;
use stackyn_common::{Error, ErrorKind, Id};
use tracing::{instrument, warn};

use crate::notify::{NotificationEvent, Notifier};
use crate::subscription::BillingService;

type HmacSha256 = Hmac<Sha256>;

/// The closed set of payment-provider webhook events this platform
/// understands. Anything else is acknowledged and ignored — the payload
/// shape beyond these fields is an opaque, out-of-scope collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    InvoicePaid,
    InvoiceFailed,
    SubscriptionCancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub user_id: Id,
    pub plan: Option<PlanName>,
    pub external_subscription_id: Option<String>,
}

/// Verifies the raw-body HMAC-SHA256 signature against the shared
/// secret. Header name carrying the signature is configurable; callers
/// reject with 401 on mismatch.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected: String = mac.finalize().into_bytes().encode_hex();
    // constant-time-ish compare via length + byte equality is sufficient here;
    // hex encoding keeps both sides fixed-width ASCII.
    expected.len() == signature_hex.len()
        && expected
            .bytes()
            .zip(signature_hex.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// A billing sweep is dispatched synchronously for `invoice_failed` and
/// `subscription_cancelled` events. Implemented by the cleanup
/// component, injected here as a narrow interface rather than a direct
/// crate dependency so the billing webhook handler stays decoupled from
/// container lifecycle concerns.
#[async_trait]
pub trait BillingSweeper: Send + Sync {
    async fn sweep_user(&self, user_id: Id) -> Result<(), Error>;
}

pub struct WebhookHandler<N: Notifier, S: BillingSweeper> {
    pool: PgPool,
    billing: BillingService<N>,
    notifier: N,
    sweeper: S,
}

impl<N: Notifier + Clone, S: BillingSweeper> WebhookHandler<N, S> {
    pub fn new(pool: PgPool, billing: BillingService<N>, notifier: N, sweeper: S) -> Self {
        Self {
            pool,
            billing,
            notifier,
            sweeper,
        }
    }

    #[instrument(skip(self, payload))]
    pub async fn handle(&self, payload: WebhookPayload) -> Result<(), Error> {
        match payload.event_type {
            WebhookEventType::SubscriptionCreated
            | WebhookEventType::SubscriptionUpdated
            | WebhookEventType::InvoicePaid => self.activate(payload).await,
            WebhookEventType::InvoiceFailed => self.expire(payload, true).await,
            WebhookEventType::SubscriptionCancelled => self.cancel(payload).await,
            WebhookEventType::Unknown => {
                warn!("ignoring webhook event outside the closed set");
                Ok(())
            }
        }
    }

    async fn activate(&self, payload: WebhookPayload) -> Result<(), Error> {
        let plan = payload.plan.unwrap_or(PlanName::Starter);
        let (max_ram_mb, max_disk_gb) = stackyn_common::models::Subscription::caps_for_plan(plan);

        let mut tx = self.pool.begin().await?;

        // Idempotent: applying the same event twice (same external id,
        // same plan) leaves the row unchanged after the first apply.
        sqlx::query(
            "UPDATE subscriptions
             SET status = 'active', plan = $2, max_ram_mb = $3, max_disk_gb = $4,
                 external_subscription_id = $5, updated_at = now()
             WHERE user_id = $1",
        )
        .bind(payload.user_id)
        .bind(plan)
        .bind(max_ram_mb)
        .bind(max_disk_gb)
        .bind(&payload.external_subscription_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users
             SET billing_status = 'active', plan_name = $2,
                 external_subscription_id = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(payload.user_id)
        .bind(plan)
        .bind(&payload.external_subscription_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.notifier
            .notify(NotificationEvent::SubscriptionActivated {
                user_id: payload.user_id.to_string(),
            });

        Ok(())
    }

    async fn expire(&self, payload: WebhookPayload, payment_failed: bool) -> Result<(), Error> {
        sqlx::query("UPDATE subscriptions SET status = 'expired', updated_at = now() WHERE user_id = $1")
            .bind(payload.user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE users SET billing_status = 'expired', updated_at = now() WHERE id = $1")
            .bind(payload.user_id)
            .execute(&self.pool)
            .await?;

        self.sweeper.sweep_user(payload.user_id).await?;

        if payment_failed {
            self.notifier.notify(NotificationEvent::PaymentFailed {
                user_id: payload.user_id.to_string(),
            });
        }

        Ok(())
    }

    async fn cancel(&self, payload: WebhookPayload) -> Result<(), Error> {
        sqlx::query("UPDATE subscriptions SET status = 'cancelled', updated_at = now() WHERE user_id = $1")
            .bind(payload.user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE users SET billing_status = 'cancelled', updated_at = now() WHERE id = $1")
            .bind(payload.user_id)
            .execute(&self.pool)
            .await?;

        self.sweeper.sweep_user(payload.user_id).await?;

        self.notifier.notify(NotificationEvent::SubscriptionExpired {
            user_id: payload.user_id.to_string(),
        });

        Ok(())
    }
}

/// Parses and validates an inbound webhook request body: HMAC
/// verification first, then payload parse, surfacing `401`/`400`
/// respectively via the structured error taxonomy.
pub fn parse_verified(secret: &str, body: &[u8], signature_hex: &str) -> Result<WebhookPayload, Error> {
    if !verify_signature(secret, body, signature_hex) {
        return Err(Error::new(ErrorKind::Unauthorized, "invalid webhook signature"));
    }
    serde_json::from_slice(body)
        .map_err(|err| Error::new(ErrorKind::Validation, format!("invalid webhook payload: {err}")))
}
