//! The persistence store: a single embedded SQLite database per project,
//! owned exclusively by one writer task.
//!
//! Producers never touch the read-write connection directly. They send a
//! boxed unit of work down a bounded channel to [`Store::open`]'s writer
//! task, optionally paired with a reply channel. Readers open independent,
//! short-lived read-only connections (the database is in WAL mode, so they
//! never block on the writer beyond a single row-level latch).
//!
//! This is the "explicit writer task... consumes a bounded channel of
//! mutations from producers" design: there is no fire-and-forget branch that
//! silently drops a write because no event loop happened to be running.

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::schema::SCHEMA;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("writer task is no longer running")]
    WriterGone,
    #[error("row not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

type WriteJob = Box<dyn FnOnce(&mut Connection) + Send>;

/// Handle to the persistence store. Cheap to clone; every clone shares the
/// same writer task and database file.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    tx: mpsc::Sender<WriteJob>,
}

impl Store {
    /// Open (or create) the project database at `db_path`, apply the schema,
    /// and spawn the writer task that will own the read-write connection for
    /// the lifetime of the returned handle.
    pub async fn open(db_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA)?;

        let (tx, rx) = mpsc::channel::<WriteJob>(256);
        tokio::task::spawn_blocking(move || writer_loop(&mut conn, rx));

        Ok(Self { db_path, tx })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Enqueue a unit of work on the writer task and await its result.
    pub async fn write<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |conn| {
            let result = f(conn);
            let _ = reply_tx.send(result);
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| StoreError::WriterGone)?;
        reply_rx.await.map_err(|_| StoreError::WriterGone)?
    }

    /// Enqueue a mutation without waiting for it to complete. Used by hot
    /// paths (e.g. Observability events) that must never block the Session
    /// Runner. Errors inside the job are swallowed by the caller's choosing;
    /// callers that care should log from within `f`.
    pub fn write_fire_and_forget<F>(&self, f: F)
    where
        F: FnOnce(&mut Connection) + Send + 'static,
    {
        let job: WriteJob = Box::new(f);
        if self.tx.try_send(job).is_err() {
            tracing::warn!("persistence writer queue full or closed; dropping fire-and-forget write");
        }
    }

    /// Run a read-only query on a short-lived connection. Never contends
    /// with the writer beyond SQLite's own row-level locking in WAL mode.
    pub async fn read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            f(&conn)
        })
        .await
        .map_err(|_| StoreError::WriterGone)?
    }

    /// Allocate the next monotonic sequence number for `prefix` (e.g.
    /// `"CP"`, `"ART"`, `"D"`). Assignment happens exclusively inside the
    /// writer task, so IDs are strictly monotonic regardless of how many
    /// producers call this concurrently.
    pub async fn next_seq(&self, prefix: &'static str) -> StoreResult<u64> {
        self.write(move |conn| {
            let tx = conn.transaction()?;
            let next: u64 = tx
                .query_row(
                    "SELECT next_value FROM id_counters WHERE prefix = ?1",
                    [prefix],
                    |r| r.get(0),
                )
                .unwrap_or(1);
            tx.execute(
                "INSERT INTO id_counters (prefix, next_value) VALUES (?1, ?2)
                 ON CONFLICT(prefix) DO UPDATE SET next_value = excluded.next_value",
                rusqlite::params![prefix, next + 1],
            )?;
            tx.commit()?;
            Ok(next)
        })
        .await
    }
}

fn writer_loop(conn: &mut Connection, mut rx: mpsc::Receiver<WriteJob>) {
    while let Some(job) = rx.blocking_recv() {
        job(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_schema_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join(".arcadia/project.db"))
            .await
            .unwrap();

        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO sessions (session_uuid, start_time, status, total_cost) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params!["s-1", "2026-01-01T00:00:00Z", "running", 0.0],
                )
                .map_err(StoreError::from)?;
                Ok(())
            })
            .await
            .unwrap();

        let status: String = store
            .read(|conn| {
                conn.query_row(
                    "SELECT status FROM sessions WHERE session_uuid = ?1",
                    ["s-1"],
                    |r| r.get(0),
                )
                .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(status, "running");
    }

    #[tokio::test]
    async fn next_seq_is_monotonic_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("project.db")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.next_seq("ART").await.unwrap() },
            ));
        }
        let mut values = Vec::new();
        for h in handles {
            values.push(h.await.unwrap());
        }
        values.sort_unstable();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn fire_and_forget_write_is_eventually_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("project.db")).await.unwrap();

        store.write_fire_and_forget(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_uuid, start_time, status, total_cost) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["s-ff", "2026-01-01T00:00:00Z", "running", 0.0],
            )
            .ok();
        });

        // Drain the writer task by sending a synchronous write after it and
        // waiting for the reply: this guarantees the fire-and-forget job
        // (strictly ordered ahead of it on the same channel) has completed.
        store.write(|_| Ok(())).await.unwrap();

        let count: i64 = store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sessions WHERE session_uuid = 's-ff'", [], |r| r.get(0))
                    .map_err(StoreError::from)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
