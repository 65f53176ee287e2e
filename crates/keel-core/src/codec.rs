//! Message codec
//!
//! Payloads and metadata are opaque bytes to the store. A codec turns them
//! into values and back:
//! - **JsonCodec**: default, dates follow chrono's RFC 3339 serde format
//!
//! The trait works on `serde_json::Value` so it stays object-safe; typed
//! helpers live on `dyn MessageCodec`.
//!
//! # Example
//!
//! ```
//! use keel_core::codec::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! let codec: &dyn MessageCodec = &JsonCodec;
//! let bytes = codec.encode(&OrderPlaced { order_id: 7 }).unwrap();
//! let back: OrderPlaced = codec.decode(&bytes).unwrap();
//! assert_eq!(back.order_id, 7);
//! ```

use crate::error::{KeelError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

/// Message metadata map
pub type Metadata = HashMap<String, serde_json::Value>;

/// Codec for payload and metadata bytes
pub trait MessageCodec: Send + Sync {
    /// Encode a value to bytes
    fn encode_value(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode bytes to a value
    fn decode_value(&self, bytes: &[u8]) -> Result<serde_json::Value>;

    /// Get the codec name
    fn name(&self) -> &str;
}

impl<'a> dyn MessageCodec + 'a {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let value = serde_json::to_value(value)?;
        self.encode_value(&value)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let value = self.decode_value(bytes)?;
        serde_json::from_value(value).map_err(|e| KeelError::Serialization(e.to_string()))
    }

    pub fn encode_metadata(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        self.encode(metadata)
    }

    /// Decode optional metadata bytes; missing bytes yield an empty map
    pub fn decode_metadata(&self, bytes: Option<&[u8]>) -> Result<Metadata> {
        match bytes {
            Some(bytes) if !bytes.is_empty() => self.decode(bytes),
            _ => Ok(Metadata::new()),
        }
    }
}

/// JSON codec (human-readable)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode_value(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| KeelError::Serialization(e.to_string()))
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| KeelError::Serialization(e.to_string()))
    }

    fn name(&self) -> &str {
        "json"
    }
}
