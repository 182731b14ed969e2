pub mod notify;
pub mod subscription;
pub mod webhook;

pub use notify::{ChannelNotifier, NotificationEvent, Notifier};
pub use subscription::BillingService;
pub use webhook::{parse_verified, BillingSweeper, WebhookHandler, WebhookEventType, WebhookPayload};
