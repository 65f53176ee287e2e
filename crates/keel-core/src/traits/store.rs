use crate::error::Result;
use crate::types::{
    AppendResult, ExpectedVersion, MessageRecord, Position, RecordedMessage, RecordedStream,
    StreamMetadata, StreamMetadataResult, UncommittedMessages, Version,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only, per-stream ordered message log
///
/// Every operation scopes its own connection. Dropping a returned future
/// stops waiting but does not roll back a statement that already reached
/// the store: treat a cancelled append as an unknown outcome and re-check
/// with [`read_stream_forward`](MessageStore::read_stream_forward).
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a batch atomically
    ///
    /// Fails with `InvalidPrecondition` for an empty stream name or
    /// `Exact(0)`, and with `WrongExpectedVersion` when the stream's
    /// version at commit time does not match `expected_version`.
    async fn append_to_stream(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        messages: UncommittedMessages,
    ) -> Result<AppendResult>;

    /// Read all messages with version >= `from_version`, ascending
    async fn read_stream_forward(&self, stream: &str, from_version: Version)
        -> Result<RecordedStream>;
}

/// Maintenance and point operations
#[async_trait]
pub trait MessageStoreAdvanced: Send + Sync {
    /// Hard-delete every message of a stream
    ///
    /// `expected_version` must be `Exact(n >= 1)`.
    async fn delete_stream(&self, stream: &str, expected_version: ExpectedVersion) -> Result<()>;

    /// Remove messages with version <= `to_version`
    ///
    /// Returns the number of removed messages. The head message is kept.
    async fn truncate_stream_to_version(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        to_version: Version,
    ) -> Result<usize>;

    /// Remove messages created at or before `to_creation_date`
    ///
    /// Returns the number of removed messages. The head message is kept.
    async fn truncate_stream_to_creation_date(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        to_creation_date: DateTime<Utc>,
    ) -> Result<usize>;

    /// Read one message, `None` when absent
    async fn read_message(&self, stream: &str, version: Version)
        -> Result<Option<RecordedMessage>>;

    /// Highest global position ever assigned, 0 for an empty store
    async fn read_head_message_position(&self) -> Result<Position>;

    async fn read_snapshot(&self, stream: &str) -> Result<Option<MessageRecord>>;

    async fn save_snapshot(&self, stream: &str, snapshot: MessageRecord) -> Result<()>;

    async fn read_stream_metadata(&self, stream: &str) -> Result<StreamMetadataResult>;

    /// Save advisory metadata
    ///
    /// `expected_version` refers to the metadata version, not the stream's.
    async fn save_stream_metadata(
        &self,
        stream: &str,
        expected_version: ExpectedVersion,
        metadata: StreamMetadata,
    ) -> Result<Version>;
}
