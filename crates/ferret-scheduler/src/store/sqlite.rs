//! SQLite-backed store.
//!
//! Claims run inside a `BEGIN IMMEDIATE` transaction, which takes SQLite's
//! write lock up front: selection and the `scheduled -> processing` update
//! commit together, and a second process trying to claim at the same time
//! waits on the busy timeout and then reports a conflict.
//!
//! Timestamps are stored as Unix nanoseconds so window and ordering
//! comparisons in SQL see the same instants the in-memory store does.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};
use tracing::debug;
use uuid::Uuid;

use super::{ClaimBatch, ClaimRef, DueItemStore};
use crate::{ItemId, ItemState, NewItem, ScheduledItem, SchedulerError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `PRAGMA user_version` of the current schema. Version 0 stored millis.
const SCHEMA_VERSION: i64 = 1;

const ITEM_COLUMNS: &str = "id, due_at, state, payload, attempts, claim_token, claimed_at, \
     last_error, created_at, updated_at";

/// A due-item store in a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, SchedulerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SchedulerError::StoreUnavailable(format!(
                    "create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path).map_err(store_error)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(store_error)?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory().map_err(store_error)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, SchedulerError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_error)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_items (
                id TEXT PRIMARY KEY,
                due_at INTEGER NOT NULL,          -- unix nanos
                state TEXT NOT NULL DEFAULT 'scheduled',
                payload TEXT NOT NULL,            -- JSON
                attempts INTEGER NOT NULL DEFAULT 0,
                claim_token TEXT,
                claimed_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scheduled_items_due
                ON scheduled_items (state, due_at, id);
            ",
        )
        .map_err(store_error)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SchedulerError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| {
                SchedulerError::StoreUnavailable("connection mutex poisoned".to_string())
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| SchedulerError::StoreUnavailable(format!("store task failed: {}", e)))?
    }

    /// Run a conditional update on a claimed item.
    ///
    /// `update` receives the id and claim token and returns the number of
    /// rows changed; zero means the claim is gone or the item never existed.
    async fn transition<F>(&self, claim: ClaimRef<'_>, update: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&Connection, &str, &str) -> rusqlite::Result<usize> + Send + 'static,
    {
        let id = claim.id.clone();
        let token = claim.token;
        self.with_conn(move |conn| {
            let Some(token) = token else {
                return Err(SchedulerError::ClaimLost(id));
            };
            let changed = update(conn, id.as_str(), &token.to_string()).map_err(store_error)?;
            if changed == 1 {
                return Ok(());
            }

            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM scheduled_items WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(store_error)?;
            match exists {
                Some(_) => Err(SchedulerError::ClaimLost(id)),
                None => Err(SchedulerError::ItemNotFound(id)),
            }
        })
        .await
    }
}

const MARK_DONE_SQL: &str = "
    UPDATE scheduled_items
    SET state = 'done', claim_token = NULL, last_error = NULL, updated_at = ?3
    WHERE id = ?1 AND claim_token = ?2 AND state = 'processing'";

const MARK_FAILED_SQL: &str = "
    UPDATE scheduled_items
    SET state = 'failed', claim_token = NULL, last_error = ?4, updated_at = ?3
    WHERE id = ?1 AND claim_token = ?2 AND state = 'processing'";

const REQUEUE_SQL: &str = "
    UPDATE scheduled_items
    SET state = 'scheduled', claim_token = NULL, claimed_at = NULL,
        last_error = ?4, due_at = ?5, updated_at = ?3
    WHERE id = ?1 AND claim_token = ?2 AND state = 'processing'";

#[async_trait]
impl DueItemStore for SqliteStore {
    async fn insert(
        &self,
        item: NewItem,
        now: DateTime<Utc>,
    ) -> Result<ScheduledItem, SchedulerError> {
        let item = item.into_item(now);
        let payload = serde_json::to_string(&item.payload)?;
        let due_at = nanos(item.due_at)?;
        let created_at = nanos(item.created_at)?;
        let row = item.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_items
                    (id, due_at, state, payload, attempts, created_at, updated_at)
                 VALUES (?1, ?2, 'scheduled', ?3, 0, ?4, ?4)",
                params![row.id.as_str(), due_at, payload, created_at],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    SchedulerError::Validation(format!("item already exists: {}", row.id))
                }
                _ => store_error(e),
            })?;
            Ok(())
        })
        .await?;
        Ok(item)
    }

    async fn get(&self, id: &ItemId) -> Result<Option<ScheduledItem>, SchedulerError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM scheduled_items WHERE id = ?1"),
                params![id.as_str()],
                item_from_row,
            )
            .optional()
            .map_err(store_error)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(limit = batch.limit))]
    async fn claim_due(&self, batch: ClaimBatch) -> Result<Vec<ScheduledItem>, SchedulerError> {
        let limit = i64::try_from(batch.limit).unwrap_or(i64::MAX);
        let horizon = saturating_nanos(batch.horizon);
        let now = nanos(batch.now)?;
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(claim_error)?;

            let ids: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT id FROM scheduled_items
                         WHERE state = 'scheduled' AND due_at <= ?1
                         ORDER BY due_at ASC, id ASC
                         LIMIT ?2",
                    )
                    .map_err(claim_error)?;
                stmt.query_map(params![horizon, limit], |row| row.get(0))
                .map_err(claim_error)?
                .collect::<Result<_, _>>()
                .map_err(claim_error)?
            };

            let mut claimed = Vec::with_capacity(ids.len());
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "UPDATE scheduled_items
                         SET state = 'processing', claim_token = ?2, claimed_at = ?3,
                             attempts = attempts + 1, updated_at = ?3
                         WHERE id = ?1 AND state = 'scheduled'
                         RETURNING {ITEM_COLUMNS}"
                    ))
                    .map_err(claim_error)?;
                for id in &ids {
                    let token = Uuid::new_v4().to_string();
                    let item = stmt
                        .query_row(params![id, token, now], item_from_row)
                        .optional()
                        .map_err(claim_error)?;
                    claimed.extend(item);
                }
            }

            tx.commit().map_err(claim_error)?;
            debug!(count = claimed.len(), "claimed items");
            Ok(claimed)
        })
        .await
    }

    async fn mark_done(
        &self,
        claim: ClaimRef<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let now = nanos(now)?;
        self.transition(claim, move |conn, id, token| {
            conn.execute(MARK_DONE_SQL, params![id, token, now])
        })
        .await
    }

    async fn mark_failed(
        &self,
        claim: ClaimRef<'_>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let now = nanos(now)?;
        let error = error.to_string();
        self.transition(claim, move |conn, id, token| {
            conn.execute(MARK_FAILED_SQL, params![id, token, now, error])
        })
        .await
    }

    async fn requeue(
        &self,
        claim: ClaimRef<'_>,
        due_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let now = nanos(now)?;
        let due_at = nanos(due_at)?;
        let error = error.to_string();
        self.transition(claim, move |conn, id, token| {
            conn.execute(REQUEUE_SQL, params![id, token, now, error, due_at])
        })
        .await
    }

    async fn reset_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemId>, SchedulerError> {
        let cutoff = saturating_nanos(cutoff);
        let now = nanos(now)?;
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "UPDATE scheduled_items
                     SET state = 'scheduled', claim_token = NULL, claimed_at = NULL,
                         updated_at = ?2
                     WHERE state = 'processing' AND claimed_at < ?1
                     RETURNING id",
                )
                .map_err(store_error)?;
            let mut ids: Vec<ItemId> = stmt
                .query_map(
                    params![cutoff, now],
                    |row| row.get::<_, String>(0).map(ItemId::from),
                )
                .map_err(store_error)?
                .collect::<Result<_, _>>()
                .map_err(store_error)?;
            ids.sort();
            Ok(ids)
        })
        .await
    }
}

/// Bring a database written by an older schema up to [`SCHEMA_VERSION`].
fn migrate(conn: &Connection) -> Result<(), SchedulerError> {
    if schema_version(conn)? >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(store_error)?;
    let version = schema_version(&tx)?;
    if version < SCHEMA_VERSION {
        tx.execute_batch(&format!(
            "UPDATE scheduled_items
             SET due_at = due_at * 1000000,
                 claimed_at = claimed_at * 1000000,
                 created_at = created_at * 1000000,
                 updated_at = updated_at * 1000000;
             PRAGMA user_version = {SCHEMA_VERSION};"
        ))
        .map_err(store_error)?;
        debug!(from = version, to = SCHEMA_VERSION, "migrated item timestamps");
    }
    tx.commit().map_err(store_error)
}

fn schema_version(conn: &Connection) -> Result<i64, SchedulerError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(store_error)
}

/// Unix nanoseconds for a timestamp the store must keep exactly.
fn nanos(ts: DateTime<Utc>) -> Result<i64, SchedulerError> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        SchedulerError::Validation(format!("timestamp out of storable range: {}", ts))
    })
}

/// Unix nanoseconds for a comparison bound, pinned to the storable range.
fn saturating_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() > 0 {
        i64::MAX
    } else {
        i64::MIN
    })
}

fn store_error(e: rusqlite::Error) -> SchedulerError {
    SchedulerError::StoreUnavailable(e.to_string())
}

/// Lock contention while claiming means another claimant won.
fn claim_error(e: rusqlite::Error) -> SchedulerError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => SchedulerError::ClaimConflict,
        _ => store_error(e),
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledItem> {
    let state: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let claim_token: Option<String> = row.get(5)?;
    let claimed_at: Option<i64> = row.get(6)?;

    Ok(ScheduledItem {
        id: ItemId::from(row.get::<_, String>(0)?),
        due_at: DateTime::from_timestamp_nanos(row.get(1)?),
        state: ItemState::parse(&state).ok_or_else(|| {
            conversion_error(2, Type::Text, format!("unknown state: {}", state))
        })?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        attempts: row.get(4)?,
        claim_token: claim_token
            .map(|t| Uuid::parse_str(&t))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        claimed_at: claimed_at.map(DateTime::from_timestamp_nanos),
        last_error: row.get(7)?,
        created_at: DateTime::from_timestamp_nanos(row.get(8)?),
        updated_at: DateTime::from_timestamp_nanos(row.get(9)?),
    })
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}
