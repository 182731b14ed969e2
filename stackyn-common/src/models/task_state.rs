use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use crate::id::Id;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TaskType {
    Build,
    Deploy,
    Cleanup,
}

impl TaskType {
    /// Dedicated queue name so a worker process only pulls its own type.
    pub fn queue_name(self) -> &'static str {
        match self {
            TaskType::Build => "build",
            TaskType::Deploy => "deploy",
            TaskType::Cleanup => "cleanup",
        }
    }

    pub fn max_retries(self) -> i32 {
        match self {
            TaskType::Build => 0,
            TaskType::Deploy => 3,
            TaskType::Cleanup => 2,
        }
    }

    pub fn attempt_timeout_secs(self) -> u64 {
        match self {
            TaskType::Build => 30 * 60,
            TaskType::Deploy => 15 * 60,
            TaskType::Cleanup => 10 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

/// Durable record of each enqueued task. Owned by the queue and survives
/// worker restarts; the sole synchronization point for retry/status
/// transitions, updated under row-level locking.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskState {
    pub id: Id,
    pub task_type: TaskType,
    pub queue: String,
    pub priority: i16,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}
