use crate::types::ExpectedVersion;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid precondition: {0}")]
    InvalidPrecondition(String),

    #[error("Wrong expected version {expected} for stream '{stream}'")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedVersion,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KeelError {
    pub fn wrong_expected_version(stream: impl Into<String>, expected: ExpectedVersion) -> Self {
        KeelError::WrongExpectedVersion {
            stream: stream.into(),
            expected,
        }
    }

    /// Whether this is an optimistic concurrency conflict
    pub fn is_wrong_expected_version(&self) -> bool {
        matches!(self, KeelError::WrongExpectedVersion { .. })
    }

    /// Whether the arguments were rejected before reaching the store
    pub fn is_invalid_precondition(&self) -> bool {
        matches!(self, KeelError::InvalidPrecondition(_))
    }
}

impl From<serde_json::Error> for KeelError {
    fn from(e: serde_json::Error) -> Self {
        KeelError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeelError>;

// Custom Error Types:
//
// Application errors raised inside projection handlers are `anyhow::Error`
// and never need to be converted into `KeelError`. For code that wraps the
// store, implement `From<KeelError>` on your own error enum:
//
// #[derive(Error, Debug)]
// pub enum OrderError {
//     #[error("Order {0} already placed")]
//     AlreadyPlaced(String),
//
//     #[error(transparent)]
//     Keel(#[from] KeelError),
// }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_expected_version_display() {
        let err = KeelError::wrong_expected_version("orders-1", ExpectedVersion::Exact(3));
        let msg = err.to_string();
        assert!(msg.contains("orders-1"));
        assert!(msg.contains('3'));
        assert!(err.is_wrong_expected_version());
        assert!(!err.is_invalid_precondition());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: KeelError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, KeelError::Serialization(_)));
    }
}
