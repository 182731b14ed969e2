use bollard::Docker;
use sqlx::PgPool;
use stackyn_builder::DeployTaskPayload;
use stackyn_common::models::TaskType;
use stackyn_common::{Error, Id};
use stackyn_logs::LogPersister;
use stackyn_queue::{Queue, Task};
use tracing::{info, instrument, warn};

use crate::admission::{admit, RamCache};
use crate::container::{self, ContainerSpec};
use crate::controller::Controller;
use crate::labels::proxy_labels;
use crate::network::ensure_network;

/// Default CPU quota (0.5 vCPU) applied to every deployed container.
const DEFAULT_CPU: f64 = 0.5;

#[derive(Clone)]
pub struct DeployWorker {
    pool: PgPool,
    docker: Docker,
    queue: Queue,
    #[allow(dead_code)]
    logs: LogPersister,
    controller: Controller,
    ram_cache: RamCache,
    base_domain: String,
    tls_enabled: bool,
    scheme: &'static str,
    container_network: String,
    cert_resolver: String,
    image_name_prefix: String,
}

impl DeployWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        docker: Docker,
        queue: Queue,
        logs: LogPersister,
        controller: Controller,
        ram_cache: RamCache,
        base_domain: String,
        tls_enabled: bool,
        scheme: &'static str,
        container_network: String,
        cert_resolver: String,
        image_name_prefix: String,
    ) -> Self {
        Self {
            pool,
            docker,
            queue,
            logs,
            controller,
            ram_cache,
            base_domain,
            tls_enabled,
            scheme,
            container_network,
            cert_resolver,
            image_name_prefix,
        }
    }

    /// Polls the `deploy` queue at `concurrency` slots. Different apps
    /// deploy in parallel; a single app's deploys are serialized by the
    /// per-app advisory guard taken in [`Self::run_pipeline`].
    pub async fn run(self, concurrency: usize) {
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency));
        loop {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
            match self.queue.dequeue(TaskType::Deploy.queue_name()).await {
                Ok(Some(task)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.handle(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(err) => {
                    drop(permit);
                    warn!(error = ?err, "failed to dequeue deploy task");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle(&self, task: Task) {
        let payload: DeployTaskPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = ?err, "malformed deploy task payload");
                let _ = self.queue.dead_letter(&task, &format!("malformed payload: {err}")).await;
                return;
            }
        };

        // One deploy at a time per app: a Postgres advisory lock keyed on
        // the app id, held for the task's lifetime. Advisory locks are
        // session-scoped, so lock/unlock must run on the same physical
        // connection — checked out once here and held, rather than
        // issued through `&self.pool` (which would hand lock and unlock
        // to two different pooled connections and leave the lock stuck
        // on a connection nobody will ever unlock again).
        let lock_key = app_lock_key(payload.app_id);
        let mut lock_conn = match self.pool.acquire().await {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!(error = ?err, "failed to acquire connection for per-app deploy lock");
                None
            }
        };
        if let Some(conn) = lock_conn.as_mut() {
            if let Err(err) = sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(lock_key)
                .execute(&mut **conn)
                .await
            {
                warn!(error = ?err, "failed to take per-app deploy lock");
            }
        }

        let result = self.run_pipeline(&payload).await;

        if let Some(conn) = lock_conn.as_mut() {
            let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(lock_key)
                .execute(&mut **conn)
                .await;
        }
        drop(lock_conn);

        match result {
            Ok(()) => {
                if let Err(err) = self.queue.ack(task.id).await {
                    warn!(error = ?err, "failed to ack completed deploy task");
                }
            }
            Err(err) => {
                self.ram_cache.decrement(payload.user_id, payload.requested_ram_mb).await;
                warn!(error = ?err, app_id = %payload.app_id, "deploy pipeline failed");
                match self.queue.retry(&task, &err.message).await {
                    Ok(outcome) => info!(?outcome, "deploy task retry outcome recorded"),
                    Err(err) => warn!(error = ?err, "failed to record retry outcome"),
                }
            }
        }
    }

    /// The full deploy pipeline. Admission-stage rejections leave no
    /// container behind; later failures remove the container. A failed
    /// deploy does not roll back — the app keeps its previous `running`
    /// deployment if one exists.
    async fn run_pipeline(&self, payload: &DeployTaskPayload) -> Result<(), Error> {
        match self.run_pipeline_inner(payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(payload, &err).await;
                Err(err)
            }
        }
    }

    async fn run_pipeline_inner(&self, payload: &DeployTaskPayload) -> Result<(), Error> {
        // Step 1: admission.
        admit(&self.pool, &self.ram_cache, payload.user_id, payload.requested_ram_mb).await?;

        sqlx::query("UPDATE deployments SET status = 'deploying', updated_at = now() WHERE id = $1")
            .bind(payload.deployment_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE apps SET status = 'deploying', updated_at = now() WHERE id = $1")
            .bind(payload.app_id)
            .execute(&self.pool)
            .await?;

        // Step 2: subdomain resolution.
        let subdomain = format!("{}.{}", payload.app_id, self.base_domain);
        let url = format!("{}://{}", self.scheme, subdomain);

        // Step 3: network precondition.
        ensure_network(&self.docker, &self.container_network).await?;

        // Step 4: stop previous.
        self.stop_previous(payload.app_id).await?;

        // Step 5: image-existence probe.
        if !container::image_exists_with_retry(&self.docker, &payload.image_ref).await {
            return Err(Error::new(
                stackyn_common::ErrorKind::BuildFailed,
                "built image is not locally inspectable after retry",
            ));
        }

        // Step 6/7: container creation + proxy labels.
        let env = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM env_vars WHERE app_id = $1")
            .bind(payload.app_id)
            .fetch_all(&self.pool)
            .await?;

        let mut labels = proxy_labels(
            &payload.app_id.to_string(),
            &subdomain,
            self.tls_enabled,
            &self.cert_resolver,
        );
        labels.insert("app.id".to_string(), payload.app_id.to_string());

        let container_name = format!(
            "{}-{}-{}",
            self.image_name_prefix, payload.app_id, payload.deployment_id
        );
        let spec = ContainerSpec {
            name: container_name,
            image: payload.image_ref.clone(),
            env,
            memory_mb: payload.requested_ram_mb as i64,
            cpu: DEFAULT_CPU,
            network: self.container_network.clone(),
            labels,
        };

        // Step 8: start with timeout (handled inside create_and_start).
        let container_id = container::create_and_start(&self.docker, &spec).await?;

        // Step 9: persist deployment record.
        sqlx::query(
            "UPDATE deployments
             SET status = 'running', container_id = $2, subdomain = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(payload.deployment_id)
        .bind(&container_id)
        .bind(&subdomain)
        .execute(&self.pool)
        .await?;

        // Step 10: update app projection.
        sqlx::query("UPDATE apps SET status = 'running', url = $2, updated_at = now() WHERE id = $1")
            .bind(payload.app_id)
            .bind(&url)
            .execute(&self.pool)
            .await?;

        // Step 11: spawn background monitors.
        self.controller
            .spawn(payload.app_id, payload.deployment_id, container_id, url)
            .await;

        Ok(())
    }

    /// Enumerates containers labeled `app.id={appId}`, stops+removes
    /// each, and marks the deployments that referenced them `stopped`.
    async fn stop_previous(&self, app_id: Id) -> Result<(), Error> {
        let containers = container::list_by_app(&self.docker, &app_id.to_string()).await?;
        for summary in containers {
            let Some(container_id) = summary.id else { continue };
            container::stop_and_remove(&self.docker, &container_id).await?;
            sqlx::query(
                "UPDATE deployments SET status = 'stopped', updated_at = now()
                 WHERE container_id = $1 AND status = 'running'",
            )
            .bind(&container_id)
            .execute(&self.pool)
            .await?;
            self.controller.cancel_container(&container_id).await;
        }
        Ok(())
    }

    async fn fail(&self, payload: &DeployTaskPayload, err: &Error) {
        let _ = sqlx::query(
            "UPDATE deployments SET status = 'failed', error_message = $2, updated_at = now() WHERE id = $1",
        )
        .bind(payload.deployment_id)
        .bind(&err.message)
        .execute(&self.pool)
        .await;

        // A failed deploy leaves the app with its previous running
        // deployment, if any; only flip the app to `failed` if it has
        // none.
        let (has_running,): (bool,) = sqlx::query_as(
            "SELECT exists(SELECT 1 FROM deployments WHERE app_id = $1 AND status = 'running')",
        )
        .bind(payload.app_id)
        .fetch_one(&self.pool)
        .await
        .unwrap_or((false,));

        if !has_running {
            let _ = sqlx::query("UPDATE apps SET status = 'failed', updated_at = now() WHERE id = $1")
                .bind(payload.app_id)
                .execute(&self.pool)
                .await;
        }
    }
}

fn app_lock_key(app_id: Id) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    app_id.hash(&mut hasher);
    hasher.finish() as i64
}
