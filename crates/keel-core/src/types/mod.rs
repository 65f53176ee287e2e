pub mod checkpoint;
pub mod message;
pub mod stream;

pub use checkpoint::ProjectionCheckpoint;
pub use message::{
    AppendResult, MessageRecord, Position, RecordedMessage, UncommittedMessages, Version,
};
pub use stream::{ExpectedVersion, RecordedStream, StreamMetadata, StreamMetadataResult};
