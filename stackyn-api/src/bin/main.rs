use std::sync::Arc;

use clap::Parser;
use stackyn_api::{router, ApiState};
use stackyn_billing::{BillingService, ChannelNotifier, WebhookHandler};
use stackyn_cleanup::BillingCleanup;
use stackyn_common::{db, Config};
use stackyn_deployer::Controller;
use stackyn_logs::LogPersister;
use stackyn_queue::Queue;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    stackyn_common::log::init(std::env::var("STACKYN_LOG_JSON").is_ok());

    let pool = db::pgpool_init(&config.database_url).await?;
    let docker = stackyn_common::docker::connect(&config.container_engine_host)?;
    let queue = Queue::new(pool.clone());
    let logs = LogPersister::new(pool.clone());
    let controller = Controller::new(docker.clone(), pool.clone(), logs.clone());

    // The email-provider call is an out-of-scope collaborator; this
    // surface only logs the event, same as the cleanup worker's wiring.
    let notifier = ChannelNotifier::spawn(|event| async move {
        info!(?event, "billing notification");
        Ok(())
    });

    let billing = BillingService::new(pool.clone(), notifier.clone());
    let sweeper = BillingCleanup::new(pool.clone(), docker.clone());
    let webhook = WebhookHandler::new(pool.clone(), billing.clone(), notifier, sweeper);

    let state = ApiState {
        pool,
        docker,
        queue,
        logs,
        controller,
        billing,
        webhook: Arc::new(webhook),
        webhook_secret: Arc::from(config.webhook_secret.as_str()),
        webhook_signature_header: Arc::from(config.webhook_signature_header.as_str()),
    };

    let app = router(state);

    info!(addr = %config.api_bind_addr, "API server starting");
    axum::Server::bind(&config.api_bind_addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
