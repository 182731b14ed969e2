use std::path::PathBuf;

use bollard::Docker;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stackyn_common::models::{BuildJobStatus, LogKind, PlanName, Subscription, TaskType};
use stackyn_common::{Error, ErrorKind, Id};
use stackyn_logs::LogPersister;
use stackyn_queue::{EnqueueOptions, Queue, Task};
use tracing::{error, info, instrument, warn};

use crate::build::{build_image, MultiWriter};
use crate::clone::{clone_dir, resolved_commit, shallow_clone};
use crate::detect::{detect_port, detect_runtime};
use crate::recipe::{image_tag, resolve as resolve_recipe};
use crate::validate::validate_constraints;

/// Payload carried by a `build` task, written by the API when an app is
/// created or redeployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTaskPayload {
    pub app_id: Id,
    pub build_job_id: Id,
    /// The deployment row created alongside the build job before this
    /// task was enqueued (spec.md §9 open question 3: build-job row
    /// always precedes the deployment row referencing it).
    pub deployment_id: Id,
    pub user_id: Id,
    pub repo_url: String,
    pub branch: String,
    pub requested_ram_mb: i32,
}

/// Payload the build worker hands off to the deploy queue on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTaskPayload {
    pub app_id: Id,
    pub deployment_id: Id,
    pub build_job_id: Id,
    pub user_id: Id,
    pub image_ref: String,
    pub requested_ram_mb: i32,
}

#[derive(Clone)]
pub struct BuildWorker {
    pool: PgPool,
    docker: Docker,
    queue: Queue,
    logs: LogPersister,
    clone_root: PathBuf,
    image_name_prefix: String,
}

impl BuildWorker {
    pub fn new(
        pool: PgPool,
        docker: Docker,
        queue: Queue,
        logs: LogPersister,
        clone_root: PathBuf,
        image_name_prefix: String,
    ) -> Self {
        Self {
            pool,
            docker,
            queue,
            logs,
            clone_root,
            image_name_prefix,
        }
    }

    /// Polls the `build` queue at `concurrency` slots, spawning one task
    /// per dequeued job.
    pub async fn run(self, concurrency: usize) {
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency));
        loop {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
            match self.queue.dequeue(TaskType::Build.queue_name()).await {
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
                    warn!(error = ?err, "failed to dequeue build task");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn handle(&self, task: Task) {
        let payload: BuildTaskPayload = match serde_json::from_value(task.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = ?err, "malformed build task payload");
                let _ = self.queue.dead_letter(&task, &format!("malformed payload: {err}")).await;
                return;
            }
        };

        match self.run_pipeline(&payload).await {
            Ok(()) => {
                if let Err(err) = self.queue.ack(task.id).await {
                    warn!(error = ?err, "failed to ack completed build task");
                }
            }
            Err(err) => {
                warn!(error = ?err, app_id = %payload.app_id, "build pipeline failed");
                match self.queue.retry(&task, &err.message).await {
                    Ok(outcome) => info!(?outcome, "build task retry outcome recorded"),
                    Err(err) => error!(error = ?err, "failed to record retry outcome"),
                }
            }
        }
    }

    /// The full build pipeline. Fails fast: the first step to error
    /// short-circuits the rest, after which the clone directory is
    /// always removed.
    async fn run_pipeline(&self, payload: &BuildTaskPayload) -> Result<(), Error> {
        self.admit(payload).await?;

        let dir = clone_dir(&self.clone_root, &payload.repo_url, &payload.build_job_id.to_string());
        let result = self.clone_validate_build(payload, &dir).await;

        if tokio::fs::metadata(&dir).await.is_ok() {
            if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                warn!(error = ?err, dir = %dir.display(), "failed to clean up clone directory");
            }
        }

        result
    }

    async fn admit(&self, payload: &BuildTaskPayload) -> Result<(), Error> {
        let (plan,): (PlanName,) = sqlx::query_as("SELECT plan_name FROM users WHERE id = $1")
            .bind(payload.user_id)
            .fetch_one(&self.pool)
            .await?;

        let (in_flight,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM task_states
             WHERE task_type = 'build' AND status = 'processing'
               AND payload->>'user_id' = $1",
        )
        .bind(payload.user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        if in_flight >= Subscription::max_concurrent_builds(plan) {
            return Err(Error::new(
                ErrorKind::PlanLimitExceeded,
                "concurrent build limit reached for the current plan",
            ));
        }

        sqlx::query("UPDATE deployments SET status = 'building', updated_at = now() WHERE id = $1")
            .bind(payload.deployment_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE build_jobs SET status = 'building', updated_at = now() WHERE id = $1")
            .bind(payload.build_job_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE apps SET status = 'building', updated_at = now() WHERE id = $1")
            .bind(payload.app_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clone_validate_build(&self, payload: &BuildTaskPayload, dir: &std::path::Path) -> Result<(), Error> {
        let writer = self.logs.writer(payload.app_id, payload.build_job_id, LogKind::Build);
        let mut multi = MultiWriter::new(writer);

        let outcome = self.clone_validate_build_inner(payload, dir, &mut multi).await;

        drop(multi);

        if let Err(ref err) = outcome {
            self.fail(payload, err).await;
        }

        outcome
    }

    async fn clone_validate_build_inner(
        &self,
        payload: &BuildTaskPayload,
        dir: &std::path::Path,
        writer: &mut MultiWriter<stackyn_logs::LogWriter>,
    ) -> Result<(), Error> {
        use std::io::Write as _;

        let _ = writeln!(writer, "cloning {} ({})", payload.repo_url, payload.branch);
        shallow_clone(&payload.repo_url, &payload.branch, dir).await?;
        let commit_sha = resolved_commit(dir).await.ok();

        validate_constraints(dir)?;

        let runtime = detect_runtime(dir)?;
        let _ = writeln!(writer, "detected runtime: {}", runtime.as_str());

        let port_detection = detect_port(dir);
        if let Some(warning) = &port_detection.warning {
            let _ = writeln!(writer, "warning: {warning}");
        }

        let tag = image_tag(&self.image_name_prefix, &payload.app_id.to_string(), &payload.build_job_id.to_string());
        let recipe = resolve_recipe(dir, runtime).await?;
        let _ = writeln!(writer, "building image {tag} via {recipe:?}");

        let sink = self.logs.writer(payload.app_id, payload.build_job_id, LogKind::Build);
        build_image(&self.docker, dir, recipe, &tag, MultiWriter::new(sink)).await?;

        sqlx::query(
            "UPDATE build_jobs SET status = 'succeeded', commit_sha = $2, runtime = $3, updated_at = now() WHERE id = $1",
        )
        .bind(payload.build_job_id)
        .bind(&commit_sha)
        .bind(runtime.as_str())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE deployments SET image_ref = $2, updated_at = now() WHERE id = $1")
            .bind(payload.deployment_id)
            .bind(&tag)
            .execute(&self.pool)
            .await?;

        // Deploy enqueue failure is logged but does not revert build state.
        if let Err(err) = self
            .queue
            .enqueue(
                TaskType::Deploy,
                DeployTaskPayload {
                    app_id: payload.app_id,
                    deployment_id: payload.deployment_id,
                    build_job_id: payload.build_job_id,
                    user_id: payload.user_id,
                    image_ref: tag,
                    requested_ram_mb: payload.requested_ram_mb,
                },
                DEPLOY_TASK_PRIORITY,
                EnqueueOptions::default(),
            )
            .await
        {
            error!(error = ?err, "failed to enqueue deploy task after a successful build");
        }

        Ok(())
    }

    async fn fail(&self, payload: &BuildTaskPayload, err: &Error) {
        let _ = sqlx::query(
            "UPDATE build_jobs SET status = 'failed', updated_at = now() WHERE id = $1",
        )
        .bind(payload.build_job_id)
        .execute(&self.pool)
        .await;
        let _ = sqlx::query(
            "UPDATE deployments SET status = 'failed', error_message = $2, updated_at = now() WHERE id = $1",
        )
        .bind(payload.deployment_id)
        .bind(&err.message)
        .execute(&self.pool)
        .await;
        let _ = sqlx::query("UPDATE apps SET status = 'failed', updated_at = now() WHERE id = $1")
            .bind(payload.app_id)
            .execute(&self.pool)
            .await;
    }
}

/// Default queue priority for the deploy task a successful build
/// enqueues, on the 4..7 "default" tier.
const DEPLOY_TASK_PRIORITY: i16 = 5;

impl BuildJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildJobStatus::Succeeded | BuildJobStatus::Failed)
    }
}
