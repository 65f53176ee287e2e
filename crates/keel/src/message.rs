//! Typed message construction
//!
//! Builds [`MessageRecord`]s from serializable payloads through a codec.
//!
//! # Example
//!
//! ```
//! use keel::message::Message;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Deposited {
//!     amount: u64,
//! }
//!
//! let record = Message::new("deposited", Deposited { amount: 50 })
//!     .with_metadata("user", "u-17")
//!     .encode()
//!     .unwrap();
//!
//! assert_eq!(record.contract_name, "deposited");
//! assert!(record.metadata.is_some());
//! ```

use chrono::{DateTime, Utc};
use keel_core::{
    codec::{JsonCodec, MessageCodec, Metadata},
    error::Result,
    types::MessageRecord,
};
use serde::Serialize;
use uuid::Uuid;

/// A message with a typed payload, not yet encoded
#[derive(Debug, Clone)]
pub struct Message<T> {
    pub message_id: Uuid,
    pub contract_name: String,
    pub payload: T,
    pub metadata: Metadata,
    pub created_at: Option<DateTime<Utc>>,
}

impl<T: Serialize> Message<T> {
    pub fn new(contract_name: impl Into<String>, payload: T) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            contract_name: contract_name.into(),
            payload,
            metadata: Metadata::new(),
            created_at: None,
        }
    }

    pub fn with_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Encode with the JSON codec
    pub fn encode(&self) -> Result<MessageRecord> {
        self.encode_with(&JsonCodec)
    }

    /// Encode with `codec`; empty metadata is stored as absent
    pub fn encode_with(&self, codec: &dyn MessageCodec) -> Result<MessageRecord> {
        let mut record = MessageRecord::new(
            self.message_id,
            self.contract_name.clone(),
            codec.encode(&self.payload)?,
        );
        if !self.metadata.is_empty() {
            record = record.with_metadata(codec.encode_metadata(&self.metadata)?);
        }
        if let Some(created_at) = self.created_at {
            record = record.with_created_at(created_at);
        }
        Ok(record)
    }
}
