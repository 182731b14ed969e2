use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Building,
    Deploying,
    Running,
    Failed,
    Disabled,
    Stopped,
    /// Reached by the crash monitor when no newer running deployment
    /// supersedes a container that died on its own.
    Error,
}

/// A user-owned unit with a repo, branch, slug, and at most one running
/// deployment.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct App {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub slug: String,
    pub repo_url: String,
    pub branch: String,
    pub status: AppStatus,
    pub url: Option<String>,
    pub ram_mb: i32,
    pub disk_gb: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub const DEFAULT_RAM_MB: i32 = 512;
    pub const DEFAULT_DISK_GB: i32 = 1;
}
