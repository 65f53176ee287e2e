//! Append write path
//!
//! All three expected-version modes share one statement shape:
//!
//! ```text
//! INSERT INTO streams (...)
//! SELECT ?1, base.version + b.column1 + 1, ...
//! FROM (VALUES (...), ...) AS b, (SELECT <base> AS version) AS base
//! WHERE <guard>
//! ```
//!
//! - `NoStream`: base is 0, guard is "no row for the stream exists"
//! - `Exact(n)`: base is n, guard is "version n exists"; the (name, version)
//!   uniqueness constraint rejects a stream that is already past n
//! - `Any`: base is `MAX(version)`, evaluated by SQLite inside the statement
//!
//! Because the SELECT reads `streams`, SQLite materializes it before the
//! first row is inserted, so the base and guard see the pre-statement state.
//! A guard that filters every row is reported as a version conflict, as is
//! a uniqueness violation.

use crate::connection::{is_unique_violation, map_sqlite_err, sql_int};
use keel_core::{
    error::{KeelError, Result},
    types::{AppendResult, ExpectedVersion, MessageRecord, UncommittedMessages},
};
use rusqlite::{types::ToSql, Connection, TransactionBehavior};

/// Messages per statement on the batched path
///
/// Each message binds six parameters; this stays well below SQLite's
/// variable limit.
pub(crate) const MAX_MESSAGES_PER_STATEMENT: usize = 500;

const PARAMS_PER_MESSAGE: usize = 6;

/// Append `messages` to `stream` inside one IMMEDIATE transaction
pub(crate) fn append(
    conn: &mut Connection,
    stream: &str,
    expected: ExpectedVersion,
    messages: &UncommittedMessages,
    batching: bool,
) -> Result<AppendResult> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(map_sqlite_err)?;

    let chunk_size = if batching && messages.len() > 1 {
        MAX_MESSAGES_PER_STATEMENT
    } else {
        1
    };

    let correlation_id = messages.correlation_id().to_string();
    let mut written = 0usize;
    let mut first_position = None;
    let mut last_position = 0u64;

    for chunk in messages.messages().chunks(chunk_size) {
        let mode = chunk_mode(expected, written as u64);
        let sql = insert_sql(mode, chunk.len());

        let mut stmt = tx.prepare_cached(&sql).map_err(map_sqlite_err)?;
        let params = insert_params(stream, &correlation_id, mode, chunk);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let inserted = match stmt.execute(refs.as_slice()) {
            Ok(n) => n,
            Err(e) if is_unique_violation(&e) => {
                return Err(KeelError::wrong_expected_version(stream, expected));
            }
            Err(e) => return Err(map_sqlite_err(e)),
        };

        if inserted != chunk.len() {
            return Err(KeelError::wrong_expected_version(stream, expected));
        }

        last_position = tx.last_insert_rowid() as u64;
        if first_position.is_none() {
            first_position = Some(last_position + 1 - inserted as u64);
        }
        written += inserted;
    }

    let current_version: i64 = tx
        .query_row(
            "SELECT MAX(version) FROM streams WHERE name = ?1",
            [stream],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;

    tx.commit().map_err(map_sqlite_err)?;

    Ok(AppendResult {
        first_position: first_position.unwrap_or(last_position),
        last_position,
        current_version: current_version as u64,
    })
}

/// Mode used for a chunk starting `offset` messages into the batch
///
/// Later chunks continue from the rows written by the earlier ones.
fn chunk_mode(expected: ExpectedVersion, offset: u64) -> ExpectedVersion {
    match (expected, offset) {
        (mode, 0) => mode,
        (ExpectedVersion::NoStream, n) => ExpectedVersion::Exact(n),
        (ExpectedVersion::Exact(v), n) => ExpectedVersion::Exact(v + n),
        (ExpectedVersion::Any, _) => ExpectedVersion::Any,
    }
}

/// Build the insert statement for `count` messages
///
/// Parameters: `?1` stream, `?2` correlation id, `?3` base version, then six
/// per message (batch index, message id, contract, payload, metadata,
/// created at).
fn insert_sql(mode: ExpectedVersion, count: usize) -> String {
    let (base, guard) = match mode {
        ExpectedVersion::NoStream => (
            "SELECT ?3 AS version",
            "NOT EXISTS (SELECT 1 FROM streams WHERE name = ?1)",
        ),
        ExpectedVersion::Exact(_) => (
            "SELECT ?3 AS version",
            "EXISTS (SELECT 1 FROM streams WHERE name = ?1 AND version = ?3)",
        ),
        ExpectedVersion::Any => (
            "SELECT COALESCE(MAX(version), ?3) AS version FROM streams WHERE name = ?1",
            "1",
        ),
    };

    let values = (0..count)
        .map(|i| {
            let p = 4 + i * PARAMS_PER_MESSAGE;
            format!(
                "(?{}, ?{}, ?{}, ?{}, ?{}, ?{})",
                p,
                p + 1,
                p + 2,
                p + 3,
                p + 4,
                p + 5
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO streams (name, version, message_id, contract_name, correlation_id, payload, metadata, created_at)
         SELECT ?1, base.version + b.column1 + 1, b.column2, b.column3, ?2, b.column4, b.column5, b.column6
         FROM (VALUES {values}) AS b, ({base}) AS base
         WHERE {guard}
         ORDER BY b.column1"
    )
}

fn insert_params(
    stream: &str,
    correlation_id: &str,
    mode: ExpectedVersion,
    chunk: &[MessageRecord],
) -> Vec<Box<dyn ToSql>> {
    let base: i64 = match mode {
        // no stored version is negative, so an out-of-range base fails the guard
        ExpectedVersion::Exact(v) => sql_int(v).unwrap_or(-1),
        ExpectedVersion::NoStream | ExpectedVersion::Any => 0,
    };

    let mut params: Vec<Box<dyn ToSql>> = Vec::with_capacity(3 + chunk.len() * PARAMS_PER_MESSAGE);
    params.push(Box::new(stream.to_string()));
    params.push(Box::new(correlation_id.to_string()));
    params.push(Box::new(base));

    for (index, msg) in chunk.iter().enumerate() {
        params.push(Box::new(index as i64));
        params.push(Box::new(msg.message_id.to_string()));
        params.push(Box::new(msg.contract_name.clone()));
        params.push(Box::new(msg.payload.clone()));
        params.push(Box::new(msg.metadata.clone()));
        params.push(Box::new(msg.created_at.timestamp_millis()));
    }

    params
}
