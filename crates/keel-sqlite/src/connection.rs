//! Per-operation connections
//!
//! Every store operation opens its own connection on a blocking thread and
//! drops it on every exit path. Transactions opened on it roll back on drop
//! unless committed.

use keel_core::{
    error::{KeelError, Result},
    StoreConfig,
};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::sync::Arc;
use std::time::Duration;

use crate::schema;

/// Open the database at startup: create parent directories, then install the schema
pub(crate) fn open_database(cfg: &StoreConfig) -> Result<()> {
    if let Some(parent) = cfg.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = open_connection(cfg)?;
    schema::install(&conn)
}

/// Open and configure a connection for one operation
pub(crate) fn open_connection(cfg: &StoreConfig) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        &cfg.path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(map_sqlite_err)?;

    configure_connection(&conn, cfg)?;
    Ok(conn)
}

/// Configure SQLite connection
fn configure_connection(conn: &Connection, cfg: &StoreConfig) -> Result<()> {
    conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
        .map_err(|e| KeelError::Config(e.to_string()))?;

    if cfg.wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| KeelError::Config(e.to_string()))?;
    }

    conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
        .map_err(|e| KeelError::Config(e.to_string()))?;

    Ok(())
}

/// Run `f` with a fresh connection on the blocking pool
///
/// Dropping the returned future stops waiting; the blocking work still runs
/// to completion.
pub(crate) async fn with_connection<T, F>(cfg: &Arc<StoreConfig>, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cfg = Arc::clone(cfg);
    tokio::task::spawn_blocking(move || {
        let mut conn = open_connection(&cfg)?;
        f(&mut conn)
    })
    .await
    .map_err(|e| KeelError::Store(format!("Task join error: {}", e)))?
}

pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> KeelError {
    KeelError::Store(e.to_string())
}

/// Whether the error is a violation of a UNIQUE or PRIMARY KEY constraint
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Bind a `u64` as an SQLite integer; `None` when it is beyond `i64::MAX`
pub(crate) fn sql_int(value: u64) -> Option<i64> {
    i64::try_from(value).ok()
}

pub(crate) fn validate_stream_name(stream: &str) -> Result<()> {
    if stream.is_empty() {
        return Err(KeelError::InvalidPrecondition(
            "stream name must not be empty".into(),
        ));
    }
    Ok(())
}
