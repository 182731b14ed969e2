use std::time::Duration;

use clap::Parser;
use stackyn_billing::ChannelNotifier;
use stackyn_cleanup::{sweep_expired_trials, sweep_resources};
use stackyn_common::{db, Config};
use stackyn_queue::Queue;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    stackyn_common::log::init(std::env::var("STACKYN_LOG_JSON").is_ok());

    let pool = db::pgpool_init(&config.database_url).await?;
    let docker = stackyn_common::docker::connect(&config.container_engine_host)?;

    // The email-provider call itself is an out-of-scope collaborator;
    // here it just logs, same as the billing webhook handler's own
    // wiring would in a deployment without a real provider configured.
    let notifier = ChannelNotifier::spawn(|event| async move {
        info!(?event, "cleanup worker notification");
        Ok(())
    });

    info!(
        billing_interval_secs = config.billing_sweep_interval_secs,
        resource_interval_secs = config.resource_sweep_interval_secs,
        "cleanup worker starting"
    );

    // Billing and resource sweeps run on independent cadences, each
    // configurable (default 30 min for the billing sweeper, a separate
    // cadence for the resource sweeper).
    let billing_pool = pool.clone();
    let billing_docker = docker.clone();
    let billing_interval = Duration::from_secs(config.billing_sweep_interval_secs);
    let billing_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(billing_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_expired_trials(&billing_pool, &billing_docker, &notifier).await {
                warn!(error = ?err, "billing sweep failed");
            }
        }
    });

    let resource_interval = Duration::from_secs(config.resource_sweep_interval_secs);
    let clone_path = config.clone_path.clone();
    let resource_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(resource_interval);
        loop {
            ticker.tick().await;
            match sweep_resources(&docker, &clone_path).await {
                Ok(report) => info!(?report, "resource sweep tick complete"),
                Err(err) => warn!(error = ?err, "resource sweep failed"),
            }
        }
    });

    // Queue-depth/dead-letter observability shares this worker's process
    // rather than getting a fourth binary of its own.
    let monitor_task = tokio::spawn(stackyn_queue::monitor::run(Queue::new(pool)));

    tokio::try_join!(billing_task, resource_task, monitor_task)?;

    Ok(())
}
