use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use stackyn_builder::BuildTaskPayload;
use stackyn_common::models::{App, Deployment, PlanName, Subscription, TaskType};
use stackyn_common::{Error, ErrorKind, Id};
use stackyn_deployer::{container, VerifyResult};
use stackyn_queue::EnqueueOptions;
use tracing::instrument;

use crate::auth::AuthUser;
use crate::ApiState;

/// Priority a fresh build task is enqueued at, on the 0..10 scale's
/// "default" tier.
const BUILD_TASK_PRIORITY: i16 = 5;

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub slug: String,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Serialize)]
pub struct CreateAppResponse {
    pub app_id: Id,
    pub build_job_id: Id,
    pub deployment_id: Id,
}

/// `POST /apps`: admission-gated app creation. The build itself happens
/// off the request path — this only creates the `app`/`build_job` rows
/// and enqueues a `build` task.
#[instrument(skip(state, body))]
pub async fn create_app(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Json(body): Json<CreateAppRequest>,
) -> Result<(StatusCode, Json<CreateAppResponse>), Error> {
    if !state.billing.billing_active(user_id).await? {
        return Err(Error::new(ErrorKind::BillingInactive, "billing is not active for this account"));
    }

    let (plan,): (PlanName,) = sqlx::query_as("SELECT plan_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;

    let (app_count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM apps WHERE user_id = $1 AND status != 'disabled'")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;
    if app_count >= Subscription::max_apps(plan) {
        return Err(Error::new(ErrorKind::PlanLimitExceeded, "app count limit reached for the current plan"));
    }

    let app_id = Id::new();
    let insert = sqlx::query(
        "INSERT INTO apps (id, user_id, name, slug, repo_url, branch, status, ram_mb, disk_gb)
         VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)",
    )
    .bind(app_id)
    .bind(user_id)
    .bind(&body.name)
    .bind(&body.slug)
    .bind(&body.repo_url)
    .bind(&body.branch)
    .bind(App::DEFAULT_RAM_MB)
    .bind(App::DEFAULT_DISK_GB)
    .execute(&state.pool)
    .await;

    if let Err(sqlx::Error::Database(db_err)) = &insert {
        if db_err.code().as_deref() == Some("23505") {
            return Err(Error::new(ErrorKind::Conflict, "an app with this slug already exists"));
        }
    }
    insert?;

    let (build_job_id, deployment_id) =
        enqueue_build(&state, app_id, user_id, &body.repo_url, &body.branch, App::DEFAULT_RAM_MB).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAppResponse { app_id, build_job_id, deployment_id }),
    ))
}

/// `POST /apps/{id}/redeploy`: re-runs the build→deploy pipeline against
/// the app's current repo/branch.
#[instrument(skip(state))]
pub async fn redeploy_app(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(app_id): Path<Id>,
) -> Result<(StatusCode, Json<CreateAppResponse>), Error> {
    if !state.billing.billing_active(user_id).await? {
        return Err(Error::new(ErrorKind::BillingInactive, "billing is not active for this account"));
    }

    let app = fetch_owned_app(&state, app_id, user_id).await?;
    let (build_job_id, deployment_id) =
        enqueue_build(&state, app.id, user_id, &app.repo_url, &app.branch, app.ram_mb).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAppResponse { app_id: app.id, build_job_id, deployment_id }),
    ))
}

/// `DELETE /apps/{id}`: tears down running containers, cancels any
/// in-flight controller monitors, then drops the app row (cascades to
/// its deployments/build jobs/env vars). A missing app is a no-op
/// success, not a 404 — deleting an already-deleted app must be safe to
/// retry. An app owned by someone else still reports not-found, to keep
/// ownership of another user's app from leaking.
#[instrument(skip(state))]
pub async fn delete_app(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(app_id): Path<Id>,
) -> Result<StatusCode, Error> {
    match fetch_owned_app(&state, app_id, user_id).await {
        Ok(_) => {}
        Err(ref err) if err.code == ErrorKind::NotFound => {
            let still_exists: bool = sqlx::query_scalar("SELECT exists(SELECT 1 FROM apps WHERE id = $1)")
                .bind(app_id)
                .fetch_one(&state.pool)
                .await?;
            if !still_exists {
                return Ok(StatusCode::OK);
            }
            return Err(Error::new(ErrorKind::NotFound, "app not found"));
        }
        Err(err) => return Err(err),
    }

    state.controller.cancel_app(app_id).await;

    let containers = container::list_by_app(&state.docker, &app_id.to_string()).await?;
    for summary in containers {
        if let Some(container_id) = summary.id {
            container::stop_and_remove(&state.docker, &container_id).await?;
        }
    }

    sqlx::query("DELETE FROM apps WHERE id = $1").bind(app_id).execute(&state.pool).await?;

    Ok(StatusCode::OK)
}

/// `GET /apps/{id}/verify`: the read-only composite projection of
/// current cluster state, never a trigger.
#[instrument(skip(state))]
pub async fn get_verify(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(app_id): Path<Id>,
) -> Result<Json<VerifyResult>, Error> {
    fetch_owned_app(&state, app_id, user_id).await?;
    let result = stackyn_deployer::verify(&state.docker, &state.pool, app_id).await?;
    Ok(Json(result))
}

/// `GET /apps/{id}/deployments`: history in reverse-chronological order.
#[instrument(skip(state))]
pub async fn list_deployments(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(app_id): Path<Id>,
) -> Result<Json<Vec<Deployment>>, Error> {
    fetch_owned_app(&state, app_id, user_id).await?;
    let deployments = sqlx::query_as::<_, Deployment>(
        "SELECT id, app_id, build_job_id, status, image_ref, container_id, subdomain,
                build_log_id, runtime_log_id, error_message, last_probe_healthy,
                last_probe_at, created_at, updated_at
         FROM deployments WHERE app_id = $1 ORDER BY created_at DESC",
    )
    .bind(app_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(deployments))
}

/// Loads `app_id`, rejecting with `NOT_FOUND` both when it doesn't exist
/// and when `user_id` doesn't own it — the two cases are indistinguishable
/// to the caller so ownership of another user's app is never leaked.
pub(crate) async fn fetch_owned_app(state: &ApiState, app_id: Id, user_id: Id) -> Result<App, Error> {
    let app = sqlx::query_as::<_, App>(
        "SELECT id, user_id, name, slug, repo_url, branch, status, url, ram_mb, disk_gb, created_at, updated_at
         FROM apps WHERE id = $1",
    )
    .bind(app_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| Error::new(ErrorKind::NotFound, "app not found"))?;

    if app.user_id != user_id {
        return Err(Error::new(ErrorKind::NotFound, "app not found"));
    }

    Ok(app)
}

/// Creates the build-job and deployment rows for a fresh attempt (the
/// build-job row always precedes the deployment row it is referenced
/// by, see DESIGN.md's FK-ordering decision) and enqueues the build
/// task. Returns `(build_job_id, deployment_id)`.
async fn enqueue_build(
    state: &ApiState,
    app_id: Id,
    user_id: Id,
    repo_url: &str,
    branch: &str,
    requested_ram_mb: i32,
) -> Result<(Id, Id), Error> {
    let build_job_id = Id::new();
    let deployment_id = Id::new();

    let mut tx = state.pool.begin().await?;
    sqlx::query("INSERT INTO build_jobs (id, app_id, status) VALUES ($1, $2, 'pending')")
        .bind(build_job_id)
        .bind(app_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO deployments (id, app_id, build_job_id, status) VALUES ($1, $2, $3, 'pending')",
    )
    .bind(deployment_id)
    .bind(app_id)
    .bind(build_job_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let payload = BuildTaskPayload {
        app_id,
        build_job_id,
        deployment_id,
        user_id,
        repo_url: repo_url.to_string(),
        branch: branch.to_string(),
        requested_ram_mb,
    };

    state
        .queue
        .enqueue(TaskType::Build, payload, BUILD_TASK_PRIORITY, EnqueueOptions::default())
        .await?;

    Ok((build_job_id, deployment_id))
}
