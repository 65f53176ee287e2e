use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{
    error::{KeelError, Result},
    observe,
    traits::{MessageStore, StreamDataSource},
    types::{
        AppendResult, ExpectedVersion, Position, RecordedMessage, RecordedStream,
        UncommittedMessages, Version,
    },
    StoreConfig,
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::append;
use crate::checkpoint::SqliteCheckpointRepository;
use crate::connection::{map_sqlite_err, open_database, sql_int, validate_stream_name, with_connection};

/// Columns selected by every message read, in [`map_row`] order
pub(crate) const MESSAGE_COLUMNS: &str = "message_position, name, version, message_id, \
     correlation_id, contract_name, payload, metadata, created_at";

/// SQLite-backed message store
///
/// Holds no connection: every operation opens one on the blocking pool.
/// Cloning is cheap and clones share the same configuration.
#[derive(Clone)]
pub struct SqliteMessageStore {
    config: Arc<StoreConfig>,
}

impl SqliteMessageStore {
    /// Open the store, creating the database file and schema if needed
    pub fn open(config: StoreConfig) -> Result<Self> {
        open_database(&config)?;

        tracing::info!(
            path = %config.path.display(),
            batching = config.batching,
            "Opened message store"
        );

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn shared_config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    /// Checkpoint repository over the same database file
    pub fn checkpoint_repository(&self) -> SqliteCheckpointRepository {
        SqliteCheckpointRepository::from_config(Arc::clone(&self.config))
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        messages: UncommittedMessages,
    ) -> Result<AppendResult> {
        validate_stream_name(stream)?;
        let expected_version = expected_version.validate()?;
        if messages.is_empty() {
            return Err(KeelError::InvalidPrecondition(
                "a batch must contain at least one message".into(),
            ));
        }

        tracing::trace!(
            stream,
            expected = %expected_version,
            count = messages.len(),
            "Appending messages"
        );

        let start = Instant::now();
        let count = messages.len();
        let batching = self.config.batching;
        let name = stream.to_string();

        let outcome = with_connection(&self.config, move |conn| {
            append::append(conn, &name, expected_version, &messages, batching)
        })
        .await;

        match outcome {
            Ok(result) => {
                if let Some(notify) = &self.config.notify {
                    notify.notify_waiters();
                }
                observe::record_append(start.elapsed(), count);

                tracing::debug!(
                    stream,
                    first_position = result.first_position,
                    last_position = result.last_position,
                    version = result.current_version,
                    "Appended messages"
                );
                Ok(result)
            }
            Err(e) => {
                if e.is_wrong_expected_version() {
                    observe::record_conflict();
                    tracing::debug!(stream, expected = %expected_version, "Append conflict");
                } else {
                    tracing::error!(stream, error = %e, "Append failed");
                }
                Err(e)
            }
        }
    }

    async fn read_stream_forward(
        &self,
        stream: &str,
        from_version: Version,
    ) -> Result<RecordedStream> {
        validate_stream_name(stream)?;
        let Some(from_version) = sql_int(from_version) else {
            return Ok(RecordedStream::Empty);
        };
        let name = stream.to_string();

        let messages = with_connection(&self.config, move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM streams
                 WHERE name = ?1 AND version >= ?2
                 ORDER BY version"
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(rusqlite::params![name, from_version], map_row)
                .map_err(map_sqlite_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sqlite_err)
        })
        .await?;

        tracing::trace!(stream, from_version, count = messages.len(), "Read stream");
        Ok(RecordedStream::from_messages(messages))
    }
}

#[async_trait]
impl StreamDataSource for SqliteMessageStore {
    async fn read_all_forward(
        &self,
        after: Position,
        limit: usize,
    ) -> Result<Vec<RecordedMessage>> {
        let Some(after) = sql_int(after) else {
            return Ok(Vec::new());
        };
        let limit = sql_int(limit as u64).unwrap_or(i64::MAX);

        with_connection(&self.config, move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM streams
                 WHERE message_position > ?1
                 ORDER BY message_position
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(rusqlite::params![after, limit], map_row)
                .map_err(map_sqlite_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sqlite_err)
        })
        .await
    }

    async fn read_head_position(&self) -> Result<Position> {
        with_connection(&self.config, read_head).await
    }
}

pub(crate) fn read_head(conn: &mut rusqlite::Connection) -> Result<Position> {
    let head: i64 = conn
        .query_row(
            "SELECT max_message_position FROM streams_stats WHERE id = 0",
            [],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;
    Ok(head.max(0) as Position)
}

/// Map a row selected with [`MESSAGE_COLUMNS`]
pub(crate) fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordedMessage> {
    Ok(RecordedMessage {
        position: row.get::<_, i64>(0)? as Position,
        stream: row.get(1)?,
        version: row.get::<_, i64>(2)? as Version,
        message_id: parse_uuid(row, 3)?,
        correlation_id: parse_uuid(row, 4)?,
        contract_name: row.get(5)?,
        payload: row.get(6)?,
        metadata: row.get(7)?,
        created_at: parse_millis(row, 8)?,
    })
}

fn parse_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_millis(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        idx, millis,
    ))
}
