//! SQLite-backed message store
//!
//! Stores every stream in one `streams` table keyed by global position.
//!
//! Key features:
//! - Optimistic concurrency checked inside the insert statement
//! - Batched or per-message write paths with identical semantics
//! - Trigger-maintained head position and message count
//! - Checkpoint repository sharing the same database file
//! - WAL mode for concurrent readers

mod advanced;
mod append;
pub mod checkpoint;
mod connection;
pub mod schema;
pub mod store;

pub use checkpoint::SqliteCheckpointRepository;
pub use store::SqliteMessageStore;
