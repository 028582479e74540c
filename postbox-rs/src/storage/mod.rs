//! Storage engine
//!
//! The only component that touches durable state. Every entity lives in one
//! SQLite database reached through a [`Store`] handle that is cloned into each
//! component at construction time.
//!
//! # Concurrency
//! - Mutations are serialized by a single writer lock per store
//! - Reads share the lock and may run concurrently with each other
//! - Multi-step invariants (UID assignment, flag replacement, account
//!   provisioning) additionally run inside one database transaction
//!
//! # Schema
//! ```text
//! users(id, identity UNIQUE, password_hash, admin)
//! mailboxes(id, user_id -> users, name, uidnext, uidvalidity, subscribed)
//! messages(id, mailbox_id -> mailboxes, content, uid, ts)
//! messageflags(id, message_id -> messages, flag)
//! queue(id, msgfrom, msgto, ts, retries, content)
//! keys(name UNIQUE, key)
//! ```

mod keys;
mod mailboxes;
mod messages;
mod queue;
mod users;

use crate::error::{MailError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        identity TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        admin INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // AUTOINCREMENT keeps a deleted mailbox id from being handed out again,
    // which would otherwise reuse its uidvalidity epoch.
    r#"
    CREATE TABLE IF NOT EXISTS mailboxes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        uidnext INTEGER NOT NULL DEFAULT 1,
        uidvalidity INTEGER NOT NULL DEFAULT 1,
        subscribed INTEGER NOT NULL DEFAULT 1,
        UNIQUE (user_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        mailbox_id INTEGER NOT NULL REFERENCES mailboxes(id) ON DELETE CASCADE,
        content BLOB NOT NULL,
        uid INTEGER NOT NULL,
        ts TEXT NOT NULL,
        UNIQUE (mailbox_id, uid)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messageflags (
        id INTEGER PRIMARY KEY,
        message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        flag TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messageflags_message ON messageflags (message_id)",
    r#"
    CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY,
        msgfrom TEXT NOT NULL,
        msgto TEXT NOT NULL,
        ts TEXT NOT NULL,
        retries INTEGER NOT NULL DEFAULT 0,
        content BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS keys (
        name TEXT NOT NULL UNIQUE,
        key BLOB NOT NULL
    )
    "#,
];

/// Handle to the mail store
///
/// Cheap to clone; clones share the pool and the writer lock.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    lock: Arc<RwLock<()>>,
}

impl Store {
    /// Open (creating if needed) the database at `database_url`
    ///
    /// In-memory URLs get a single long-lived connection so that every
    /// operation sees the same database.
    pub async fn open(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!("Mail store opened at {}", database_url);

        Ok(Self {
            pool,
            lock: Arc::new(RwLock::new(())),
        })
    }

    /// Fresh private store, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<()> {
        let _guard = self.read().await;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

/// Map "zero rows touched" onto NotFound
fn expect_one_row(result: SqliteQueryResult, what: impl FnOnce() -> String) -> Result<()> {
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(MailError::NotFound(what()))
    }
}

/// Turn a unique-constraint violation into AlreadyExists
fn conflict(e: sqlx::Error, what: impl FnOnce() -> String) -> MailError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => MailError::AlreadyExists(what()),
        _ => MailError::Database(e),
    }
}

fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MailError::Storage(format!("Invalid timestamp {}: {}", raw, e)))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| MailError::Storage(format!("{} out of range: {}", column, value)))
}
