use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{info, warn};

/// Lifecycle notifications this component emits. Sending is
/// fire-and-forget: failure never blocks the state machine that raised it.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    TrialStarted { user_id: String },
    SubscriptionActivated { user_id: String },
    PaymentFailed { user_id: String },
    SubscriptionExpired { user_id: String },
    TrialEnded { user_id: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: NotificationEvent);
}

/// Queues notifications onto an unbounded channel drained by a
/// background task, so a billing transition is never blocked waiting on
/// the email provider. A retry-on-send policy may duplicate, so this is
/// a delivery-at-least-once / processing-order-not-guaranteed channel,
/// not the `TaskState`-backed queue used elsewhere, since notifications
/// are not in that component's closed task-type set.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<NotificationEvent>,
}

impl ChannelNotifier {
    /// Spawns the background sender. `send` is the actual email-provider
    /// call (an out-of-scope collaborator); its failure is logged and
    /// otherwise ignored.
    pub fn spawn<F, Fut>(send: F) -> Self
    where
        F: Fn(NotificationEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
    {
        let (tx, mut rx) = unbounded_channel::<NotificationEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                info!(?event, "dispatching notification");
                if let Err(err) = send(event).await {
                    warn!(error = ?err, "notification send failed (ignored, fire-and-forget)");
                }
            }
        });

        Self { tx }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: NotificationEvent) {
        let _ = self.tx.send(event);
    }
}
