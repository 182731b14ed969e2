use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum BuildJobStatus {
    Pending,
    Building,
    Succeeded,
    Failed,
}

/// The build half of a deployment; produces an image. Always created
/// before the deployment row that references it, so the deployment's
/// `build_job_id` foreign key is never dangling.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildJob {
    pub id: Id,
    pub app_id: Id,
    pub status: BuildJobStatus,
    pub commit_sha: Option<String>,
    pub runtime: Option<String>,
    pub build_log_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
