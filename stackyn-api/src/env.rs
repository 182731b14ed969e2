use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use stackyn_common::{Error, ErrorKind, Id};
use tracing::instrument;

use crate::apps::fetch_owned_app;
use crate::auth::AuthUser;
use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct SetEnvRequest {
    pub key: String,
    pub value: String,
}

/// `POST /apps/{id}/env`: upserts one env-var. Gated on billing the same
/// way app creation is; `PORT` is rejected here too since it is injected
/// and overridden unconditionally at container-create time, and storing
/// it would be silently ignored at deploy.
#[instrument(skip(state, body))]
pub async fn set_env(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path(app_id): Path<Id>,
    Json(body): Json<SetEnvRequest>,
) -> Result<StatusCode, Error> {
    if !state.billing.billing_active(user_id).await? {
        return Err(Error::new(ErrorKind::BillingInactive, "billing is not active for this account"));
    }
    fetch_owned_app(&state, app_id, user_id).await?;

    if body.key.eq_ignore_ascii_case("PORT") {
        return Err(Error::new(ErrorKind::Validation, "PORT is reserved and cannot be set"));
    }

    sqlx::query(
        "INSERT INTO env_vars (app_id, key, value) VALUES ($1, $2, $3)
         ON CONFLICT (app_id, key) DO UPDATE SET value = excluded.value, updated_at = now()",
    )
    .bind(app_id)
    .bind(&body.key)
    .bind(&body.value)
    .execute(&state.pool)
    .await?;

    Ok(StatusCode::OK)
}

/// `DELETE /apps/{id}/env/{key}`.
#[instrument(skip(state))]
pub async fn delete_env(
    State(state): State<ApiState>,
    AuthUser { user_id }: AuthUser,
    Path((app_id, key)): Path<(Id, String)>,
) -> Result<StatusCode, Error> {
    if !state.billing.billing_active(user_id).await? {
        return Err(Error::new(ErrorKind::BillingInactive, "billing is not active for this account"));
    }
    fetch_owned_app(&state, app_id, user_id).await?;

    sqlx::query("DELETE FROM env_vars WHERE app_id = $1 AND key = $2")
        .bind(app_id)
        .bind(&key)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::OK)
}
