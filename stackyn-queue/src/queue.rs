use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use stackyn_common::models::{TaskStatus, TaskType};
use stackyn_common::{Error, ErrorKind, Id};
use tracing::{instrument, warn};

use crate::backoff::retry_delay;

/// Options accepted by [`Queue::enqueue`].
#[derive(Default, Debug, Clone)]
pub struct EnqueueOptions {
    pub max_retries: Option<i32>,
    pub queue_override: Option<String>,
}

/// A task popped off the queue, ready for a worker to execute.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Id,
    pub task_type: TaskType,
    pub queue: String,
    pub priority: i16,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// Durable, retryable, priority-aware dispatch. Backed by `task_states`
/// in the relational store rather than an actual external redis-like
/// process — that backend is treated as a given; here it is modeled
/// directly against Postgres with `FOR UPDATE SKIP LOCKED` so concurrent
/// worker pool slots never race on the same row. The task-state table
/// is the sole synchronization point.
#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
}

impl Queue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        task_type: TaskType,
        payload: impl Serialize,
        priority: i16,
        options: EnqueueOptions,
    ) -> Result<Id, Error> {
        let id = Id::new();
        let queue = options
            .queue_override
            .unwrap_or_else(|| task_type.queue_name().to_string());
        let max_retries = options.max_retries.unwrap_or_else(|| task_type.max_retries());
        let payload = serde_json::to_value(payload)
            .map_err(|err| Error::new(ErrorKind::InternalPlatformError, err.to_string()))?;

        sqlx::query(
            "INSERT INTO task_states
                (id, task_type, queue, priority, payload, status, retry_count, max_retries)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)",
        )
        .bind(id)
        .bind(task_type)
        .bind(&queue)
        .bind(priority)
        .bind(payload)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Pops at most one task for `queue`, preferring critical over default
    /// over low priority tier, then oldest first within a tier.
    /// Returns `None` if nothing is pending; callers poll in a loop.
    #[instrument(skip(self))]
    pub async fn dequeue(&self, queue: &str) -> Result<Option<Task>, Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (Id, TaskType, String, i16, serde_json::Value, i32, i32)>(
            "SELECT id, task_type, queue, priority, payload, retry_count, max_retries
             FROM task_states
             WHERE queue = $1 AND status IN ('pending', 'retrying')
             ORDER BY
                CASE WHEN priority >= 8 THEN 0 WHEN priority >= 4 THEN 1 ELSE 2 END,
                created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, task_type, queue, priority, payload, retry_count, max_retries)) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE task_states SET status = 'processing', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(Task {
            id,
            task_type,
            queue,
            priority,
            payload,
            retry_count,
            max_retries,
        }))
    }

    // Terminal: a completed task never mutates thereafter.
    #[instrument(skip(self))]
    pub async fn ack(&self, task_id: Id) -> Result<(), Error> {
        sqlx::query(
            "UPDATE task_states
             SET status = 'completed', completed_at = now(), updated_at = now()
             WHERE id = $1 AND status NOT IN ('completed', 'failed')",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a failed attempt. If retries remain, schedules the retry
    /// after an exponential backoff delay and returns
    /// [`RetryOutcome::WillRetry`]; otherwise moves the task to the dead
    /// letter and returns [`RetryOutcome::DeadLettered`].
    #[instrument(skip(self, task))]
    pub async fn retry(&self, task: &Task, error: &str) -> Result<RetryOutcome, Error> {
        let next_attempt = task.retry_count + 1;

        if next_attempt > task.max_retries {
            self.dead_letter(task, error).await?;
            return Ok(RetryOutcome::DeadLettered);
        }

        sqlx::query(
            "UPDATE task_states
             SET status = 'retrying', retry_count = $2, last_error = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(next_attempt)
        .bind(error)
        .execute(&self.pool)
        .await?;

        let delay = retry_delay(task.retry_count as u32);
        let pool = self.pool.clone();
        let id = task.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) =
                sqlx::query("UPDATE task_states SET status = 'pending', updated_at = now() WHERE id = $1 AND status = 'retrying'")
                    .bind(id)
                    .execute(&pool)
                    .await
            {
                warn!(error = ?err, task_id = %id, "failed to requeue task after backoff");
            }
        });

        Ok(RetryOutcome::WillRetry {
            attempt: next_attempt,
            delay: retry_delay(task.retry_count as u32),
        })
    }

    /// Moves a task that exhausted retries to the dead-letter table,
    /// logged with full payload and last error.
    #[instrument(skip(self, task))]
    pub async fn dead_letter(&self, task: &Task, error: &str) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE task_states
             SET status = 'failed', failed_at = now(), last_error = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO dead_letters (id, task_id, task_type, queue, payload, last_error)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Id::new())
        .bind(task.id)
        .bind(task.task_type)
        .bind(&task.queue)
        .bind(&task.payload)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::error!(task_id = %task.id, queue = %task.queue, error, "task dead-lettered");
        Ok(())
    }

    pub async fn depth(&self, queue: &str) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM task_states WHERE queue = $1 AND status IN ('pending', 'retrying', 'processing')",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn dead_letter_depth(&self, queue: &str) -> Result<i64, Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM dead_letters WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    WillRetry { attempt: i32, delay: Duration },
    DeadLettered,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}
