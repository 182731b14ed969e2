use clap::Parser;
use stackyn_common::{db, Config};
use stackyn_deployer::{Controller, DeployWorker, RamCache};
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

    // RAM accounting is a soft cache; ground truth is a reducer query
    // over `running` deployments, repopulated once here at process start.
    let ram_cache = RamCache::new(pool.clone());
    ram_cache.reconcile_all().await?;

    let worker = DeployWorker::new(
        pool,
        docker,
        queue,
        logs,
        controller,
        ram_cache,
        config.app_base_domain.clone(),
        config.tls_enabled(),
        config.subdomain_scheme(),
        config.container_network.clone(),
        config.cert_resolver.clone(),
        config.image_name_prefix.clone(),
    );

    info!(concurrency = config.worker_concurrency, "deploy worker starting");
    worker.run(config.worker_concurrency).await;

    Ok(())
}
