//! Keel Core: Traits and types for the Keel message store
//!
//! This crate defines the abstractions shared by the storage backend and
//! the projection engine:
//! - Stream & message model: streams, versions, global positions
//! - Message store: append/read plus advanced maintenance operations
//! - Checkpoint repository: durable per-projection cursors
//! - Stream data source: bounded forward reads by global position
//! - Codec: payload and metadata encoding, JSON by default
//!
//! Key guarantees:
//! - Versions within a stream are contiguous from 1 and never duplicated
//! - Global positions are strictly increasing across the whole store
//! - Conflicting writers are rejected at commit with `WrongExpectedVersion`

pub mod codec;
pub mod config;
pub mod error;
pub mod observe;
pub mod traits;
pub mod types;

pub use codec::{JsonCodec, MessageCodec, Metadata};
pub use config::{ProjectorConfig, StoreConfig, SynchronousMode};
pub use error::{KeelError, Result};
pub use traits::{CheckpointRepository, MessageStore, MessageStoreAdvanced, StreamDataSource};
pub use types::{
    AppendResult, ExpectedVersion, MessageRecord, Position, ProjectionCheckpoint,
    RecordedMessage, RecordedStream, StreamMetadata, StreamMetadataResult, UncommittedMessages,
    Version,
};
