use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Running,
    Failed,
    Stopped,
    Error,
}

/// One build/deploy attempt for an app. Exactly one deployment per app may
/// be `running` at a time; superseded deployments move to `stopped`,
/// crashed ones to `error`, but the row always persists as history (it is
/// never deleted except by cascade from the owning app).
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    pub id: Id,
    pub app_id: Id,
    pub build_job_id: Id,
    pub status: DeploymentStatus,
    pub image_ref: Option<String>,
    pub container_id: Option<String>,
    pub subdomain: Option<String>,
    pub build_log_id: Option<Id>,
    pub runtime_log_id: Option<Id>,
    pub error_message: Option<String>,
    /// Outcome of the deployment controller's most recent health/crash
    /// probe (container-running check plus, once due, the HTTP
    /// reachability probe). `None` until the first probe runs.
    pub last_probe_healthy: Option<bool>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
