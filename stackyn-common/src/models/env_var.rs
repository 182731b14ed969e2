use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::id::Id;

/// Per-app key/value supplied to the container process at start. `key` is
/// unique within an app; `PORT` is always dropped at container creation
/// time regardless of whether it appears here.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnvVar {
    pub app_id: Id,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
