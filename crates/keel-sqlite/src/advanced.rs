//! Maintenance and point operations
//!
//! Delete and truncate check the stream's current version inside an
//! IMMEDIATE transaction, so the check and the removal see the same state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{
    codec::{JsonCodec, MessageCodec},
    error::{KeelError, Result},
    traits::MessageStoreAdvanced,
    types::{
        ExpectedVersion, MessageRecord, Position, RecordedMessage, StreamMetadata,
        StreamMetadataResult, Version,
    },
};
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use crate::connection::{map_sqlite_err, sql_int, validate_stream_name, with_connection};
use crate::store::{map_row, read_head, SqliteMessageStore, MESSAGE_COLUMNS};

/// Which messages a truncation removes, besides always keeping the head
#[derive(Debug, Clone, Copy)]
enum TruncateBound {
    Version(Version),
    CreatedAt(DateTime<Utc>),
}

impl SqliteMessageStore {
    async fn truncate(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        bound: TruncateBound,
    ) -> Result<usize> {
        validate_stream_name(stream)?;
        let expected = expected_version.require_exact()?;

        tracing::trace!(stream, expected, ?bound, "Truncating stream");

        let name = stream.to_string();
        let removed = with_connection(self.shared_config(), move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;
            let head = check_current_version(&tx, &name, expected_version, expected)?;

            let removed = match bound {
                TruncateBound::Version(to_version) => tx.execute(
                    "DELETE FROM streams WHERE name = ?1 AND version <= ?2 AND version < ?3",
                    params![name, sql_int(to_version).unwrap_or(i64::MAX), head],
                ),
                TruncateBound::CreatedAt(date) => tx.execute(
                    "DELETE FROM streams WHERE name = ?1 AND created_at <= ?2 AND version < ?3",
                    params![name, date.timestamp_millis(), head],
                ),
            }
            .map_err(map_sqlite_err)?;

            tx.commit().map_err(map_sqlite_err)?;
            Ok(removed)
        })
        .await?;

        tracing::debug!(stream, removed, "Truncated stream");
        Ok(removed)
    }
}

/// Fail with `WrongExpectedVersion` unless the stream's head is `expected`
///
/// Returns the head version as stored.
fn check_current_version(
    tx: &Transaction<'_>,
    stream: &str,
    expected_version: ExpectedVersion,
    expected: Version,
) -> Result<i64> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT MAX(version) FROM streams WHERE name = ?1",
            [stream],
            |row| row.get(0),
        )
        .map_err(map_sqlite_err)?;

    match (current, sql_int(expected)) {
        (Some(head), Some(expected)) if head == expected => Ok(head),
        _ => Err(KeelError::wrong_expected_version(stream, expected_version)),
    }
}

#[async_trait]
impl MessageStoreAdvanced for SqliteMessageStore {
    async fn delete_stream(&self, stream: &str, expected_version: ExpectedVersion) -> Result<()> {
        validate_stream_name(stream)?;
        let expected = expected_version.require_exact()?;

        tracing::trace!(stream, expected, "Deleting stream");

        let name = stream.to_string();
        let removed = with_connection(self.shared_config(), move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;
            check_current_version(&tx, &name, expected_version, expected)?;

            let removed = tx
                .execute("DELETE FROM streams WHERE name = ?1", [&name])
                .map_err(map_sqlite_err)?;
            tx.execute("DELETE FROM streams_metadata WHERE name = ?1", [&name])
                .map_err(map_sqlite_err)?;

            tx.commit().map_err(map_sqlite_err)?;
            Ok(removed)
        })
        .await?;

        tracing::debug!(stream, removed, "Deleted stream");
        Ok(())
    }

    async fn truncate_stream_to_version(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        to_version: Version,
    ) -> Result<usize> {
        self.truncate(stream, expected_version, TruncateBound::Version(to_version))
            .await
    }

    async fn truncate_stream_to_creation_date(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        to_creation_date: DateTime<Utc>,
    ) -> Result<usize> {
        self.truncate(
            stream,
            expected_version,
            TruncateBound::CreatedAt(to_creation_date),
        )
        .await
    }

    async fn read_message(
        &self,
        stream: &str,
        version: Version,
    ) -> Result<Option<RecordedMessage>> {
        validate_stream_name(stream)?;
        if version == 0 {
            return Err(KeelError::InvalidPrecondition(
                "message version should be greater or equal 1".into(),
            ));
        }

        let Some(version) = sql_int(version) else {
            return Ok(None);
        };
        let name = stream.to_string();
        let message = with_connection(self.shared_config(), move |conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM streams WHERE name = ?1 AND version = ?2");
            conn.query_row(&sql, params![name, version], map_row)
                .optional()
                .map_err(map_sqlite_err)
        })
        .await?;

        tracing::trace!(stream, version, found = message.is_some(), "Read message");
        Ok(message)
    }

    async fn read_head_message_position(&self) -> Result<Position> {
        let head = with_connection(self.shared_config(), read_head).await?;
        tracing::trace!(head, "Read head message position");
        Ok(head)
    }

    async fn read_snapshot(&self, _stream: &str) -> Result<Option<MessageRecord>> {
        Err(KeelError::NotSupported(
            "snapshots are not supported by the SQLite store".into(),
        ))
    }

    async fn save_snapshot(&self, _stream: &str, _snapshot: MessageRecord) -> Result<()> {
        Err(KeelError::NotSupported(
            "snapshots are not supported by the SQLite store".into(),
        ))
    }

    async fn read_stream_metadata(&self, stream: &str) -> Result<StreamMetadataResult> {
        validate_stream_name(stream)?;

        let name = stream.to_string();
        let row = with_connection(self.shared_config(), move |conn| {
            conn.query_row(
                "SELECT metadata_version, payload FROM streams_metadata WHERE name = ?1",
                [&name],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()
            .map_err(map_sqlite_err)
        })
        .await?;

        let codec: &dyn MessageCodec = &JsonCodec;
        let (metadata_version, metadata) = match row {
            Some((version, payload)) => (version as Version, Some(codec.decode::<StreamMetadata>(&payload)?)),
            None => (0, None),
        };

        Ok(StreamMetadataResult {
            stream: stream.to_string(),
            metadata_version,
            metadata,
        })
    }

    async fn save_stream_metadata(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        metadata: StreamMetadata,
    ) -> Result<Version> {
        validate_stream_name(stream)?;
        let expected_version = expected_version.validate()?;

        let codec: &dyn MessageCodec = &JsonCodec;
        let payload = codec.encode(&metadata)?;
        let name = stream.to_string();

        let version = with_connection(self.shared_config(), move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT metadata_version FROM streams_metadata WHERE name = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)?;

            let matches = match (expected_version, current) {
                (ExpectedVersion::Any, _) => true,
                (ExpectedVersion::NoStream, None) => true,
                (ExpectedVersion::Exact(n), Some(v)) => sql_int(n) == Some(v),
                _ => false,
            };
            if !matches {
                return Err(KeelError::wrong_expected_version(&name, expected_version));
            }

            let next = current.unwrap_or(0) + 1;
            tx.execute(
                "INSERT INTO streams_metadata (name, metadata_version, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     metadata_version = excluded.metadata_version,
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![name, next, payload, Utc::now().timestamp_millis()],
            )
            .map_err(map_sqlite_err)?;

            tx.commit().map_err(map_sqlite_err)?;
            Ok(next as Version)
        })
        .await?;

        tracing::debug!(stream, version, "Saved stream metadata");
        Ok(version)
    }
}
