//! Keel: an embedded event-sourcing message store
//!
//! Keel provides:
//! - **Message store**: append-only streams with optimistic concurrency (SQLite)
//! - **Advanced operations**: delete, truncate, point reads, stream metadata
//! - **Projector**: catch-up dispatch into projections with durable checkpoints
//! - **Runner**: supervision of many projectors on tokio tasks
//!
//! # Quick Start
//!
//! ```no_run
//! use keel::prelude::*;
//!
//! # #[derive(Deserialize)]
//! # struct Deposited { amount: i64 }
//! # async fn example() -> Result<()> {
//! let keel = Keel::open("./data/keel.db")?;
//!
//! let record = Message::new("deposited", serde_json::json!({ "amount": 50 })).encode()?;
//! keel.store()
//!     .append_to_stream("account-1", ExpectedVersion::NoStream, UncommittedMessages::single(record))
//!     .await?;
//!
//! let balances = Projection::builder("balances")
//!     .on::<Deposited, _>("deposited", |msg, _meta, ctx| {
//!         println!("{} += {}", ctx.stream, msg.amount);
//!         Ok(())
//!     })
//!     .build();
//!
//! let mut projector = keel.projector("read-models").add_projection(balances).build()?;
//! projector.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod message;
pub mod prelude;

// Re-export core types
pub use keel_core::{
    codec::{JsonCodec, MessageCodec, Metadata},
    config::{ProjectorConfig, StoreConfig, SynchronousMode},
    error::{KeelError, Result},
    traits::{CheckpointRepository, MessageStore, MessageStoreAdvanced, StreamDataSource},
    types::{
        AppendResult, ExpectedVersion, MessageRecord, Position, ProjectionCheckpoint,
        RecordedMessage, RecordedStream, StreamMetadata, StreamMetadataResult,
        UncommittedMessages, Version,
    },
};

// Re-export implementations
pub use keel_projector::{
    ContractMessage, DefaultUpConverterFactory, DispatchingResult, ProjectingContext,
    ProjectingError, Projection, ProjectionBuilder, ProjectionDescriptor, Projector,
    ProjectorBuilder, ProjectorReport, ProjectorRunner, ProjectorState, RunSummary,
    ShutdownHandle, UpConvert, UpConverterFactory,
};
pub use keel_sqlite::{SqliteCheckpointRepository, SqliteMessageStore};

// Re-export main types from this crate
pub use db::Keel;
pub use message::Message;
