use crate::error::{KeelError, Result};
use crate::types::message::{RecordedMessage, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Caller's belief about a stream's current version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// The stream must not exist yet
    NoStream,
    /// Skip the check; versions are computed inside the write
    Any,
    /// The stream's current version must equal this value (>= 1)
    Exact(Version),
}

impl ExpectedVersion {
    /// Raw value of [`ExpectedVersion::Any`]
    pub const ANY: i64 = -1;

    /// Raw value of [`ExpectedVersion::NoStream`]
    pub const NO_STREAM: i64 = 0;

    /// Parse the integer form: `-1` is `Any`, `0` is `NoStream`, `n >= 1` is `Exact(n)`
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            Self::ANY => Ok(ExpectedVersion::Any),
            Self::NO_STREAM => Ok(ExpectedVersion::NoStream),
            n if n >= 1 => Ok(ExpectedVersion::Exact(n as Version)),
            n => Err(KeelError::InvalidPrecondition(format!(
                "expected version must be >= 1, Any ({}) or NoStream ({}), got {}",
                Self::ANY,
                Self::NO_STREAM,
                n
            ))),
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            ExpectedVersion::Any => Self::ANY,
            ExpectedVersion::NoStream => Self::NO_STREAM,
            ExpectedVersion::Exact(n) => n as i64,
        }
    }

    /// Reject `Exact(0)`, which has no meaning
    pub fn validate(self) -> Result<Self> {
        match self {
            ExpectedVersion::Exact(0) => Err(KeelError::InvalidPrecondition(
                "expected version must be >= 1".into(),
            )),
            other => Ok(other),
        }
    }

    /// Require an explicit version, as delete and truncate do
    pub fn require_exact(self) -> Result<Version> {
        match self {
            ExpectedVersion::Exact(n) if n >= 1 => Ok(n),
            other => Err(KeelError::InvalidPrecondition(format!(
                "expected version should be greater or equal 1, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::NoStream => write!(f, "NoStream"),
            ExpectedVersion::Any => write!(f, "Any"),
            ExpectedVersion::Exact(n) => write!(f, "{}", n),
        }
    }
}

impl From<Version> for ExpectedVersion {
    fn from(version: Version) -> Self {
        ExpectedVersion::Exact(version)
    }
}

/// Result of a forward stream read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordedStream {
    #[default]
    Empty,
    Messages(Vec<RecordedMessage>),
}

impl RecordedStream {
    pub fn from_messages(messages: Vec<RecordedMessage>) -> Self {
        if messages.is_empty() {
            RecordedStream::Empty
        } else {
            RecordedStream::Messages(messages)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RecordedStream::Empty)
    }

    pub fn messages(&self) -> &[RecordedMessage] {
        match self {
            RecordedStream::Empty => &[],
            RecordedStream::Messages(m) => m,
        }
    }

    pub fn into_messages(self) -> Vec<RecordedMessage> {
        match self {
            RecordedStream::Empty => Vec::new(),
            RecordedStream::Messages(m) => m,
        }
    }

    /// Version of the last message read, if any
    pub fn last_version(&self) -> Option<Version> {
        self.messages().last().map(|m| m.version)
    }
}

/// Advisory per-stream retention policy
///
/// Stored and returned as-is; the engine never enforces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Maximum age of messages in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,

    /// Maximum number of messages to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,

    /// Messages below this version are considered removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_before: Option<Version>,

    /// Custom fields
    #[serde(default, flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl StreamMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age_secs(mut self, secs: u64) -> Self {
        self.max_age_secs = Some(secs);
        self
    }

    pub fn with_max_count(mut self, count: u64) -> Self {
        self.max_count = Some(count);
        self
    }

    pub fn with_truncate_before(mut self, version: Version) -> Self {
        self.truncate_before = Some(version);
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Stream metadata together with its own version
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataResult {
    pub stream: String,

    /// 0 when no metadata has been saved
    pub metadata_version: Version,

    pub metadata: Option<StreamMetadata>,
}
