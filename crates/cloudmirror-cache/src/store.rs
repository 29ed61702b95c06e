//! SQLite implementation of IMappingStore
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                    |
//! |-----------------|----------|---------------------------------------------|
//! | SyncPath        | TEXT     | `.to_key()` / `SyncPath::new()`             |
//! | RemoteId        | TEXT     | `.as_str()` / `RemoteId::new()`             |
//! | Provider        | TEXT     | `.as_str()` / `FromStr`                     |
//! | DateTime<Utc>   | TEXT     | `to_rfc3339()` / `parse_from_rfc3339()`     |
//! | bool            | INTEGER  | 0 / 1                                       |
//!
//! Subtree matching uses `local_path = root OR local_path LIKE 'root/%'`
//! with LIKE metacharacters escaped, so `/a` never matches `/ab`.
//!
//! File databases run in WAL mode with `synchronous = FULL`, so every
//! mutation is durable once the call returns. In-memory databases are bound
//! to one connection, the only way SQLite keeps them alive across queries.

use std::path::{Path, MAIN_SEPARATOR};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, info};

use cloudmirror_core::domain::{
    newtypes::{RemoteId, SyncPath},
    policy::StopSyncPolicy,
    record::{MappedEntry, Provider, RemoteRecord, Scope},
};
use cloudmirror_core::ports::{IMappingStore, StoreEvent};

use crate::CacheError;

const EVENT_CAPACITY: usize = 64;

/// Connections kept open for a database file
const FILE_POOL_SIZE: u32 = 4;

/// How long a writer waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = include_str!("migrations/20261016_initial.sql");

const KIND_STOPPED: &str = "stopped";
const KIND_RESUMED: &str = "resumed";

/// SQLite-backed mapping store
///
/// Cheap to share behind an `Arc`; all state lives in the database and the
/// event channel.
pub struct SqliteMappingStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl SqliteMappingStore {
    /// Creates a store over an already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { pool, events }
    }

    /// Opens (creating if needed) the database file at `path`
    ///
    /// Missing parent directories are created and the schema is applied.
    pub async fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {e}", path.display()))
            })?;
        apply_schema(&pool).await?;

        info!(path = %path.display(), "Mapping store opened");
        Ok(Self::new(pool))
    }

    /// Opens a fresh in-memory database
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory database: {e}")))?;
        apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    async fn publish_policy(&self) -> anyhow::Result<()> {
        let policy = self.policy().await?;
        self.publish(StoreEvent::PolicyChanged(policy));
        Ok(())
    }
}

/// Creates tables and indexes; every statement is idempotent
async fn apply_schema(pool: &SqlitePool) -> Result<(), CacheError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| CacheError::MigrationFailed(e.to_string()))?;
    debug!("Mapping schema applied");
    Ok(())
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Escapes LIKE metacharacters using `\` as the escape character
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// LIKE pattern matching strict descendants of `root`
fn descendants_pattern(root: &SyncPath) -> String {
    let key = root.to_key();
    let mut pattern = escape_like(&key);
    if !key.ends_with(MAIN_SEPARATOR) {
        pattern.push(MAIN_SEPARATOR);
    }
    pattern.push('%');
    pattern
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::CorruptRow(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_entry(row: &SqliteRow) -> Result<MappedEntry, CacheError> {
    let corrupt = |e: cloudmirror_core::domain::DomainError| CacheError::CorruptRow(e.to_string());

    let path: String = row.try_get("local_path")?;
    let provider: String = row.try_get("provider")?;
    let account: String = row.try_get("account")?;
    let remote_id: String = row.try_get("remote_id")?;
    let parent_id: String = row.try_get("parent_id")?;
    let is_directory: bool = row.try_get("is_directory")?;
    let last_sync: String = row.try_get("last_sync")?;

    Ok(MappedEntry {
        path: SyncPath::new(path).map_err(corrupt)?,
        record: RemoteRecord {
            remote_id: RemoteId::new(remote_id).map_err(corrupt)?,
            parent_id: RemoteId::new(parent_id).map_err(corrupt)?,
            is_directory,
            last_sync: parse_timestamp(&last_sync)?,
            provider: provider.parse::<Provider>().map_err(corrupt)?,
            account,
        },
    })
}

/// Removes policy entries at or under `root`; returns rows removed
async fn prune_policy(conn: &mut SqliteConnection, root: &SyncPath) -> Result<u64, CacheError> {
    let result =
        sqlx::query("DELETE FROM sync_policy WHERE local_path = ? OR local_path LIKE ? ESCAPE '\\'")
            .bind(root.to_key())
            .bind(descendants_pattern(root))
            .execute(conn)
            .await?;
    Ok(result.rows_affected())
}

/// Moves `path` into the `kind` set, removing it from the other one
async fn set_policy_kind(
    pool: &SqlitePool,
    path: &SyncPath,
    kind: &str,
    other: &str,
) -> Result<(), CacheError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM sync_policy WHERE local_path = ? AND kind = ?")
        .bind(path.to_key())
        .bind(other)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT OR IGNORE INTO sync_policy (local_path, kind, created_at) VALUES (?, ?, ?)",
    )
    .bind(path.to_key())
    .bind(kind)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

// ============================================================================
// IMappingStore implementation
// ============================================================================

#[async_trait]
impl IMappingStore for SqliteMappingStore {
    async fn get(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<Option<RemoteRecord>> {
        let row = sqlx::query(
            "SELECT * FROM remote_records WHERE local_path = ? AND provider = ? AND account = ?",
        )
        .bind(path.to_key())
        .bind(scope.provider.as_str())
        .bind(&scope.account)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row_to_entry(&row)?.record)),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &SyncPath, record: &RemoteRecord) -> anyhow::Result<()> {
        let parent_path = path.parent().map(|p| p.to_key());

        sqlx::query(
            r#"
            INSERT INTO remote_records
                (local_path, provider, account, parent_path, remote_id, parent_id, is_directory, last_sync)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (local_path, provider, account) DO UPDATE SET
                parent_path = excluded.parent_path,
                remote_id = excluded.remote_id,
                parent_id = excluded.parent_id,
                is_directory = excluded.is_directory,
                last_sync = excluded.last_sync
            "#,
        )
        .bind(path.to_key())
        .bind(record.provider.as_str())
        .bind(&record.account)
        .bind(parent_path)
        .bind(record.remote_id.as_str())
        .bind(record.parent_id.as_str())
        .bind(record.is_directory)
        .bind(record.last_sync.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(path = %path, remote_id = %record.remote_id, scope = %record.scope(), "Mapping stored");
        Ok(())
    }

    async fn delete(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM remote_records WHERE local_path = ? AND provider = ? AND account = ?",
        )
        .bind(path.to_key())
        .bind(scope.provider.as_str())
        .bind(&scope.account)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let pruned = prune_policy(&mut tx, path).await?;
        tx.commit().await?;

        debug!(path = %path, scope = %scope, removed, pruned, "Mapping deleted");
        if pruned > 0 {
            self.publish_policy().await?;
        }
        Ok(removed > 0)
    }

    async fn delete_subtree(&self, root: &SyncPath, scope: &Scope) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            r#"
            DELETE FROM remote_records
            WHERE provider = ? AND account = ?
              AND (local_path = ? OR local_path LIKE ? ESCAPE '\')
            "#,
        )
        .bind(scope.provider.as_str())
        .bind(&scope.account)
        .bind(root.to_key())
        .bind(descendants_pattern(root))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let pruned = prune_policy(&mut tx, root).await?;
        tx.commit().await?;

        debug!(root = %root, scope = %scope, removed, pruned, "Mapping subtree deleted");
        self.publish(StoreEvent::SubtreeRemoved {
            root: root.clone(),
            scope: scope.clone(),
            removed,
        });
        if pruned > 0 {
            self.publish_policy().await?;
        }
        Ok(removed)
    }

    async fn keys(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<SyncPath>> {
        let rows: Vec<String> = match scope {
            Some(scope) => {
                sqlx::query_scalar(
                    "SELECT local_path FROM remote_records WHERE provider = ? AND account = ? ORDER BY local_path",
                )
                .bind(scope.provider.as_str())
                .bind(&scope.account)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT DISTINCT local_path FROM remote_records ORDER BY local_path",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|raw| SyncPath::new(raw).map_err(|e| CacheError::CorruptRow(e.to_string()).into()))
            .collect()
    }

    async fn entries(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<MappedEntry>> {
        let rows = match scope {
            Some(scope) => {
                sqlx::query(
                    "SELECT * FROM remote_records WHERE provider = ? AND account = ? ORDER BY local_path",
                )
                .bind(scope.provider.as_str())
                .bind(&scope.account)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM remote_records ORDER BY local_path, provider, account")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn children(
        &self,
        parent: &SyncPath,
        scope: &Scope,
    ) -> anyhow::Result<Vec<MappedEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM remote_records
            WHERE parent_path = ? AND provider = ? AND account = ?
            ORDER BY local_path
            "#,
        )
        .bind(parent.to_key())
        .bind(scope.provider.as_str())
        .bind(&scope.account)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_entry)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn touch(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE remote_records SET last_sync = ? WHERE local_path = ? AND provider = ? AND account = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(path.to_key())
        .bind(scope.provider.as_str())
        .bind(&scope.account)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn policy(&self) -> anyhow::Result<StopSyncPolicy> {
        let rows = sqlx::query("SELECT local_path, kind FROM sync_policy ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut stopped = Vec::new();
        let mut resumed = Vec::new();
        for row in &rows {
            let raw: String = row.try_get("local_path")?;
            let kind: String = row.try_get("kind")?;
            let path = SyncPath::new(raw).map_err(|e| CacheError::CorruptRow(e.to_string()))?;
            match kind.as_str() {
                KIND_STOPPED => stopped.push(path),
                KIND_RESUMED => resumed.push(path),
                other => {
                    return Err(CacheError::CorruptRow(format!("unknown policy kind {other:?}")).into())
                }
            }
        }
        Ok(StopSyncPolicy::new(stopped, resumed))
    }

    async fn stop_sync(&self, path: &SyncPath) -> anyhow::Result<()> {
        set_policy_kind(&self.pool, path, KIND_STOPPED, KIND_RESUMED).await?;
        debug!(path = %path, "Sync stopped");
        self.publish_policy().await
    }

    async fn resume_sync(&self, path: &SyncPath) -> anyhow::Result<()> {
        set_policy_kind(&self.pool, path, KIND_RESUMED, KIND_STOPPED).await?;
        debug!(path = %path, "Sync resumed");
        self.publish_policy().await
    }

    async fn clear_policy(&self, path: &SyncPath) -> anyhow::Result<bool> {
        let removed = sqlx::query("DELETE FROM sync_policy WHERE local_path = ?")
            .bind(path.to_key())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed > 0 {
            self.publish_policy().await?;
        }
        Ok(removed > 0)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn flush(&self) -> anyhow::Result<()> {
        sqlx::raw_sql("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if !self.pool.is_closed() {
            self.flush().await?;
            self.pool.close().await;
            info!("Mapping store closed");
        }
        Ok(())
    }
}
