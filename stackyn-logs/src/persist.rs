use sqlx::PgPool;
use stackyn_common::models::{LogEntry, LogKind};
use stackyn_common::{Error, Id};
use tracing::instrument;

use crate::writer::LogWriter;

/// Append-only writer/reader for build and runtime logs. No in-place
/// updates; rotation of old logs is left to the cleanup worker. Reads
/// are pulled by the API via the replay-by-sequence interface below.
#[derive(Clone)]
pub struct LogPersister {
    pool: PgPool,
}

impl LogPersister {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one chunk, keyed by `(app_id, owner_id, kind)`, with a
    /// sequence number one greater than the highest already stored for
    /// that triple.
    #[instrument(skip(self, chunk))]
    pub async fn persist_log(
        &self,
        app_id: Id,
        owner_id: Id,
        kind: LogKind,
        chunk: &[u8],
    ) -> Result<i64, Error> {
        let mut tx = self.pool.begin().await?;

        let (next_seq,): (i64,) = sqlx::query_as(
            "SELECT coalesce(max(sequence), -1) + 1 FROM log_entries
             WHERE app_id = $1 AND owner_id = $2 AND kind = $3",
        )
        .bind(app_id)
        .bind(owner_id)
        .bind(kind)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO log_entries (id, app_id, owner_id, kind, sequence, chunk, chunk_size)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Id::new())
        .bind(app_id)
        .bind(owner_id)
        .bind(kind)
        .bind(next_seq)
        .bind(chunk)
        .bind(chunk.len() as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(next_seq)
    }

    /// Returns a [`LogWriter`] that buffers bytes until a newline and
    /// flushes each line as one call to [`Self::persist_log`], mirroring
    /// `deployer/src/deployment/build_logs.rs`'s `BuildLogWriter`. Safe
    /// for a single writer per `(app_id, owner_id, kind)` triple; writers
    /// must not interleave chunks from different streams.
    pub fn writer(&self, app_id: Id, owner_id: Id, kind: LogKind) -> LogWriter {
        LogWriter::new(self.clone(), app_id, owner_id, kind)
    }

    /// Replay interface the API uses for `GET /deployments/{id}/logs`:
    /// entries in capture order from `from_sequence` onward.
    #[instrument(skip(self))]
    pub async fn replay(
        &self,
        app_id: Id,
        owner_id: Id,
        kind: LogKind,
        from_sequence: i64,
    ) -> Result<Vec<LogEntry>, Error> {
        let entries = sqlx::query_as::<_, LogEntry>(
            "SELECT id, app_id, owner_id, kind, sequence, timestamp, chunk, chunk_size
             FROM log_entries
             WHERE app_id = $1 AND owner_id = $2 AND kind = $3 AND sequence >= $4
             ORDER BY sequence ASC",
        )
        .bind(app_id)
        .bind(owner_id)
        .bind(kind)
        .bind(from_sequence)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Age-based pruning the cleanup worker may invoke.
    #[instrument(skip(self))]
    pub async fn prune_older_than(&self, age: chrono::Duration) -> Result<u64, Error> {
        let cutoff = chrono::Utc::now() - age;
        let result = sqlx::query("DELETE FROM log_entries WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
