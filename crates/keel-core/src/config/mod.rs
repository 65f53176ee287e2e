pub mod projector;
pub mod store;

pub use projector::ProjectorConfig;
pub use store::{StoreConfig, SynchronousMode};
