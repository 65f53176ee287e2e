//! Projector: catch-up dispatch of the message log
//!
//! Replays the store in global-position order into registered projections.
//!
//! Key features:
//! - Explicit dispatch tables keyed by contract name
//! - Durable per-projection checkpoints, advanced after each batch
//! - Bounded retries with optional drop of failing projections
//! - Chained up-conversion of old message shapes
//! - Push-based wakeups on append, polling fallback
//! - Runner supervising many projectors

pub mod projection;
pub mod projector;
pub mod result;
pub mod runner;
pub mod upconvert;

#[cfg(test)]
mod testing;

pub use projection::{ProjectingContext, Projection, ProjectionBuilder};
pub use projector::{
    ProjectionDescriptor, Projector, ProjectorBuilder, ProjectorReport, ProjectorState,
    ShutdownHandle,
};
pub use result::{DispatchingResult, ProjectingError, RunSummary};
pub use runner::ProjectorRunner;
pub use upconvert::{
    upconvert_until, ContractMessage, DefaultUpConverterFactory, UpConvert, UpConverterFactory,
};
