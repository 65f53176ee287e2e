pub mod checkpoint;
pub mod source;
pub mod store;

pub use checkpoint::CheckpointRepository;
pub use source::StreamDataSource;
pub use store::{MessageStore, MessageStoreAdvanced};
