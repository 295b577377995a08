use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::warn;

use crate::event::Event;

/// Enumeration of errors for operations with the dedup store.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
/// Any of them means the store is unavailable for the event at hand.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("schema migration failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of attempting to record an identity in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This call created the record: the event is unique.
    Inserted,
    /// A record with the same identity already existed: the event is a duplicate.
    AlreadyExists,
}

/// A record persisted once per unique identity.
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
pub struct DedupRecord {
    pub topic: String,
    pub event_id: String,
    pub source: String,
    pub payload: sqlx::types::Json<serde_json::Value>,
    /// The producer's timestamp of the delivery that won the insert.
    pub timestamp: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

/// The ledger of seen identities used by the worker pool.
///
/// `try_insert` must be atomic with respect to identity: when called concurrently with the same
/// `(topic, event_id)`, exactly one caller observes `Inserted`.
#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn try_insert(&self, event: &Event) -> StoreResult<InsertOutcome>;

    /// Records in insertion order, optionally restricted to one topic.
    async fn list(&self, topic: Option<&str>) -> StoreResult<Vec<DedupRecord>>;

    async fn ping(&self) -> bool;
}

/// A dedup store implemented on top of a SQLite table.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (creating it if missing) the SQLite database at `path` and apply pending migrations.
    ///
    /// # Arguments
    ///
    /// * `path`: Location of the database file. Records survive restarts as long as it is kept.
    /// * `max_connections`: Upper bound of connections used by concurrent workers.
    pub async fn new(path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|error| StoreError::PoolCreationError { error })?;

        Self::new_from_pool(pool).await
    }

    /// Initialize a store from a provided connection pool, applying pending migrations.
    pub async fn new_from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .map_err(|error| StoreError::MigrationError { error })?;

        Ok(Self { pool })
    }

    /// Wait for all connections to be returned and close them.
    pub async fn close(&self) {
        self.pool.close().await
    }
}

#[async_trait]
impl Deduplicator for DedupStore {
    async fn try_insert(&self, event: &Event) -> StoreResult<InsertOutcome> {
        // The primary key makes SQLite decide the winner, concurrent losers hit the conflict
        // clause.
        let result = sqlx::query(
            r#"
INSERT INTO processed_events
    (topic, event_id, source, payload, timestamp, inserted_at)
VALUES
    (?, ?, ?, ?, ?, ?)
ON CONFLICT (topic, event_id) DO NOTHING
            "#,
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .bind(&event.source)
        .bind(sqlx::types::Json(&event.payload))
        .bind(event.timestamp)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        match result.rows_affected() {
            0 => Ok(InsertOutcome::AlreadyExists),
            _ => Ok(InsertOutcome::Inserted),
        }
    }

    async fn list(&self, topic: Option<&str>) -> StoreResult<Vec<DedupRecord>> {
        // rowid grows with every insert and records are never deleted, so it is insertion order.
        let query = match topic {
            Some(topic) => sqlx::query_as::<_, DedupRecord>(
                r#"
SELECT topic, event_id, source, payload, timestamp, inserted_at
FROM processed_events
WHERE topic = ?
ORDER BY rowid ASC
                "#,
            )
            .bind(topic.to_owned()),
            None => sqlx::query_as::<_, DedupRecord>(
                r#"
SELECT topic, event_id, source, payload, timestamp, inserted_at
FROM processed_events
ORDER BY rowid ASC
                "#,
            ),
        };

        query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(error) => {
                warn!("dedup store ping failed: {}", error);
                false
            }
        }
    }
}
