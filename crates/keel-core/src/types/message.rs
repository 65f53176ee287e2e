use crate::error::{KeelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Global position - store-wide strictly increasing, first message is 1
pub type Position = u64;

/// Version of a message within its stream, starting at 1
pub type Version = u64;

/// A message waiting to be appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Globally unique message id
    pub message_id: Uuid,

    /// Stable type tag used for dispatch and deserialization
    pub contract_name: String,

    /// 0-based position of the record inside its batch
    ///
    /// Assigned by [`UncommittedMessages::new`].
    pub batch_position: usize,

    /// Encoded payload
    pub payload: Vec<u8>,

    /// Encoded metadata
    pub metadata: Option<Vec<u8>>,

    /// Client-supplied creation time
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(message_id: Uuid, contract_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            contract_name: contract_name.into(),
            batch_position: 0,
            payload,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// One atomic append unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedMessages {
    correlation_id: Uuid,
    messages: Vec<MessageRecord>,
}

impl UncommittedMessages {
    /// Create a batch, numbering the records in order
    ///
    /// Returns `InvalidPrecondition` for an empty batch.
    pub fn new(correlation_id: Uuid, messages: Vec<MessageRecord>) -> Result<Self> {
        if messages.is_empty() {
            return Err(KeelError::InvalidPrecondition(
                "a batch must contain at least one message".into(),
            ));
        }

        let messages = messages
            .into_iter()
            .enumerate()
            .map(|(i, mut m)| {
                m.batch_position = i;
                m
            })
            .collect();

        Ok(Self {
            correlation_id,
            messages,
        })
    }

    /// Create a single-message batch with a fresh correlation id
    pub fn single(message: MessageRecord) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            messages: vec![MessageRecord {
                batch_position: 0,
                ..message
            }],
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A committed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMessage {
    pub position: Position,
    pub stream: String,
    pub version: Version,
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub contract_name: String,
    pub payload: Vec<u8>,
    pub metadata: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResult {
    pub first_position: Position,
    pub last_position: Position,

    /// Stream version after the append
    pub current_version: Version,
}
