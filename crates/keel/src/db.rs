//! Unified Keel interface
//!
//! Bundles the message store, the checkpoint repository and an append
//! notification hook over one SQLite file.

use crate::{
    ProjectorBuilder, Result, SqliteCheckpointRepository, SqliteMessageStore, StoreConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;

/// Store, checkpoints and projector wiring for one database file
pub struct Keel {
    store: Arc<SqliteMessageStore>,
    checkpoints: Arc<SqliteCheckpointRepository>,
    notify: Arc<Notify>,
    path: PathBuf,
}

impl Keel {
    /// Open a Keel database file, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(StoreConfig::new(path.as_ref()))
    }

    /// Open with a custom store configuration
    ///
    /// A notification hook is installed unless the config already has one.
    pub fn open_with_config(config: StoreConfig) -> Result<Self> {
        let notify = config
            .notify
            .clone()
            .unwrap_or_else(|| Arc::new(Notify::new()));
        let path = config.path.clone();

        let store = SqliteMessageStore::open(config.with_notify(Arc::clone(&notify)))?;
        let checkpoints = store.checkpoint_repository();

        Ok(Self {
            store: Arc::new(store),
            checkpoints: Arc::new(checkpoints),
            notify,
            path,
        })
    }

    pub fn store(&self) -> &Arc<SqliteMessageStore> {
        &self.store
    }

    pub fn checkpoints(&self) -> &Arc<SqliteCheckpointRepository> {
        &self.checkpoints
    }

    /// Signalled after every committed append
    pub fn notify(&self) -> &Arc<Notify> {
        &self.notify
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a projector reading this store and woken by its appends
    pub fn projector(
        &self,
        name: impl Into<String>,
    ) -> ProjectorBuilder<SqliteMessageStore, SqliteCheckpointRepository> {
        ProjectorBuilder::new(name, Arc::clone(&self.store), Arc::clone(&self.checkpoints))
            .with_notify(Arc::clone(&self.notify))
    }
}
