//! Keel Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use keel::prelude::*;
//! ```

// Core types
pub use crate::{
    AppendResult, ExpectedVersion, Keel, KeelError, Message, MessageRecord, Position,
    RecordedMessage, RecordedStream, Result, UncommittedMessages, Version,
};

// Configs
pub use crate::{ProjectorConfig, StoreConfig, SynchronousMode};

// Traits
pub use crate::{
    CheckpointRepository, MessageCodec, MessageStore, MessageStoreAdvanced, StreamDataSource,
};

// Implementations
pub use crate::{JsonCodec, SqliteCheckpointRepository, SqliteMessageStore};

// Projections
pub use crate::{
    DefaultUpConverterFactory, DispatchingResult, Metadata, ProjectingContext, ProjectingError,
    Projection, Projector, ProjectorRunner, ProjectorState,
};

// Stream maintenance
pub use crate::{StreamMetadata, StreamMetadataResult};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
