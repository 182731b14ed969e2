use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use stackyn_common::models::{LogEntry, LogKind};
use stackyn_common::{Error, ErrorKind, Id};
use tracing::instrument;

use crate::auth::AuthUser;
use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub kind: Option<LogKind>,
    pub from_sequence: Option<i64>,
}

/// `GET /deployments/{id}/logs`: replays either the build log (keyed by
/// the deployment's build job) or the runtime log (keyed by the
/// deployment itself) from `from_sequence` onward, defaulting to runtime
/// logs from the beginning.
#[instrument(skip(state))]
pub async fn get_logs(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(deployment_id): Path<Id>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, Error> {
    let row: Option<(Id, Id, Id)> = sqlx::query_as(
        "SELECT d.app_id, d.build_job_id, a.user_id
         FROM deployments d JOIN apps a ON a.id = d.app_id
         WHERE d.id = $1",
    )
    .bind(deployment_id)
    .fetch_optional(&state.pool)
    .await?;

    let Some((app_id, build_job_id, owner_user_id)) = row else {
        return Err(Error::new(ErrorKind::NotFound, "deployment not found"));
    };
    if owner_user_id != user_id {
        return Err(Error::new(ErrorKind::NotFound, "deployment not found"));
    }

    let kind = query.kind.unwrap_or(LogKind::Runtime);
    let owner_id = match kind {
        LogKind::Build => build_job_id,
        LogKind::Runtime => deployment_id,
    };

    let entries = state
        .logs
        .replay(app_id, owner_id, kind, query.from_sequence.unwrap_or(0))
        .await?;
    Ok(Json(entries))
}
