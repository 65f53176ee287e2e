use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Configuration for the message store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    /// Write multi-message batches with a single statement
    /// Default: true
    #[serde(default = "default_batching")]
    pub batching: bool,

    /// How long a connection waits on a locked database (milliseconds)
    /// Default: 5000
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode
    /// Default: true
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// SQLite synchronous mode
    #[serde(default)]
    pub synchronous: SynchronousMode,

    /// Signalled after every successful append.
    ///
    /// Best-effort and at-most-once: `notify_waiters()` only wakes tasks
    /// that are waiting at the moment of the commit.
    #[serde(skip)]
    pub notify: Option<Arc<Notify>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynchronousMode {
    /// Full fsync (safest, slowest)
    Full,
    /// fsync at critical moments (good balance)
    #[default]
    Normal,
    /// No fsync (fastest, least safe)
    Off,
}

impl SynchronousMode {
    pub fn as_pragma(self) -> &'static str {
        match self {
            SynchronousMode::Full => "FULL",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Off => "OFF",
        }
    }
}

fn default_batching() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_wal_mode() -> bool {
    true
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batching: default_batching(),
            busy_timeout_ms: default_busy_timeout_ms(),
            wal_mode: default_wal_mode(),
            synchronous: SynchronousMode::default(),
            notify: None,
        }
    }

    pub fn with_batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_synchronous(mut self, synchronous: SynchronousMode) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_wal_mode(mut self, wal_mode: bool) -> Self {
        self.wal_mode = wal_mode;
        self
    }

    /// Attach a notification hook fired after each committed append
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"path": "/tmp/keel.db"}"#).unwrap();
        assert!(cfg.batching);
        assert!(cfg.wal_mode);
        assert_eq!(cfg.busy_timeout_ms, 5000);
        assert_eq!(cfg.synchronous, SynchronousMode::Normal);
        assert!(cfg.notify.is_none());
    }
}
