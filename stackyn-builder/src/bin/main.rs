use clap::Parser;
use stackyn_builder::BuildWorker;
use stackyn_common::{db, Config};
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

    tokio::fs::create_dir_all(&config.clone_path).await?;

    let worker = BuildWorker::new(
        pool,
        docker,
        queue,
        logs,
        config.clone_path.clone(),
        config.image_name_prefix.clone(),
    );

    info!(concurrency = config.worker_concurrency, "build worker starting");
    worker.run(config.worker_concurrency).await;

    Ok(())
}
