/*!
SQLite-backed checkpoint store.

Durable implementation of the `Checkpointer` trait for single-host
deployments and human-in-the-loop workflows that must survive process
restarts. Checkpoints are stored one row per `(thread_id, seq)` with the
serde persistence model as the JSON payload; `save` is an upsert on that
key, and `load_latest` reads the highest committed seq.

The schema is created on connect, keeping the store self-contained:

```sql
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id  TEXT    NOT NULL,
    seq        INTEGER NOT NULL,
    status     TEXT    NOT NULL,
    payload    TEXT    NOT NULL,
    created_at TEXT    NOT NULL,
    PRIMARY KEY (thread_id, seq)
);
```
*/

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use super::checkpoint::{Checkpoint, Checkpointer, CheckpointerError, Result};
use super::persistence::{from_json, to_json};

/// Checkpoint store backed by a SQLite database.
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Connect to the database at `url` (e.g. `sqlite://fablegraph.db`) and
    /// ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        // One connection: serializes writes per store, and keeps
        // `sqlite::memory:` URLs on a single shared database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                 thread_id  TEXT    NOT NULL,
                 seq        INTEGER NOT NULL,
                 status     TEXT    NOT NULL,
                 payload    TEXT    NOT NULL,
                 created_at TEXT    NOT NULL,
                 PRIMARY KEY (thread_id, seq)
             )",
        )
        .execute(&pool)
        .await
        .map_err(backend)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (the host may share one across subsystems).
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> CheckpointerError {
    CheckpointerError::Backend {
        message: err.to_string(),
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let payload = to_json(&checkpoint)?;
        sqlx::query(
            "INSERT INTO checkpoints (thread_id, seq, status, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (thread_id, seq)
             DO UPDATE SET status = excluded.status,
                           payload = excluded.payload,
                           created_at = excluded.created_at",
        )
        .bind(&checkpoint.thread_id)
        .bind(checkpoint.seq as i64)
        .bind(checkpoint.status.to_string())
        .bind(payload)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT payload FROM checkpoints
             WHERE thread_id = ?1
             ORDER BY seq DESC
             LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(backend)?;
                Ok(Some(from_json(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT thread_id FROM checkpoints")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("thread_id").map_err(backend))
            .collect()
    }
}
