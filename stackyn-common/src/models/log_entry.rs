use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LogKind {
    Build,
    Runtime,
}

/// Append-only log chunk. `owner_id` is the build-job id for `Build`
/// entries and the deployment id for `Runtime` entries; sequence is
/// monotonically increasing per `(app_id, owner_id, kind)` triple so a
/// reader can replay in capture order.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntry {
    pub id: Id,
    pub app_id: Id,
    pub owner_id: Id,
    pub kind: LogKind,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub chunk: Vec<u8>,
    pub chunk_size: i32,
}
