//! Projections and their dispatch tables
//!
//! A projection is a named set of handlers keyed by message contract name.
//! The table is built once by [`ProjectionBuilder`] and never changes.
//!
//! # Example
//!
//! ```
//! use keel_projector::Projection;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! let projection = Projection::builder("order-totals")
//!     .on::<OrderPlaced, _>("order-placed", |msg, _meta, ctx| {
//!         println!("order {} at position {}", msg.order_id, ctx.position);
//!         Ok(())
//!     })
//!     .build();
//!
//! assert!(projection.handles("order-placed"));
//! ```

use chrono::{DateTime, Utc};
use keel_core::{Metadata, Position, RecordedMessage, Version};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// What a handler knows about the message it is given
#[derive(Debug, Clone)]
pub struct ProjectingContext {
    pub projector_name: String,
    pub projection_name: String,
    pub position: Position,
    pub stream: String,
    pub version: Version,
    pub message_id: Uuid,
    pub correlation_id: Uuid,

    /// Contract name as stored, before any up-conversion
    pub contract_name: String,

    pub created_at: DateTime<Utc>,

    /// 1-based attempt number
    pub attempt: u8,
}

impl ProjectingContext {
    pub(crate) fn new(
        projector_name: &str,
        projection_name: &str,
        message: &RecordedMessage,
        attempt: u8,
    ) -> Self {
        Self {
            projector_name: projector_name.to_string(),
            projection_name: projection_name.to_string(),
            position: message.position,
            stream: message.stream.clone(),
            version: message.version,
            message_id: message.message_id,
            correlation_id: message.correlation_id,
            contract_name: message.contract_name.clone(),
            created_at: message.created_at,
            attempt,
        }
    }
}

type Handler =
    Box<dyn Fn(serde_json::Value, &Metadata, &ProjectingContext) -> anyhow::Result<()> + Send + Sync>;

/// A named dispatch table
pub struct Projection {
    name: String,
    handlers: HashMap<String, Handler>,
}

impl Projection {
    pub fn builder(name: impl Into<String>) -> ProjectionBuilder {
        ProjectionBuilder {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Name used as the checkpoint key
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self, contract_name: &str) -> bool {
        self.handlers.contains_key(contract_name)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Route a decoded payload to its handler
    ///
    /// Returns `None` when no handler is registered for `contract_name`.
    pub fn dispatch(
        &self,
        contract_name: &str,
        payload: serde_json::Value,
        metadata: &Metadata,
        ctx: &ProjectingContext,
    ) -> Option<anyhow::Result<()>> {
        self.handlers
            .get(contract_name)
            .map(|handler| handler(payload, metadata, ctx))
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut contracts: Vec<_> = self.contracts().collect();
        contracts.sort_unstable();
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("contracts", &contracts)
            .finish()
    }
}

pub struct ProjectionBuilder {
    name: String,
    handlers: HashMap<String, Handler>,
}

impl ProjectionBuilder {
    /// Register a typed handler for one contract
    ///
    /// A later registration for the same contract replaces the earlier one.
    pub fn on<T, F>(mut self, contract_name: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T, &Metadata, &ProjectingContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let contract_name = contract_name.into();
        let handler: Handler = Box::new(move |payload, metadata, ctx| {
            let message: T = serde_json::from_value(payload)?;
            handler(message, metadata, ctx)
        });

        if self.handlers.insert(contract_name.clone(), handler).is_some() {
            tracing::warn!(
                projection = %self.name,
                contract = %contract_name,
                "Replaced handler"
            );
        }
        self
    }

    /// Register a handler that receives the raw JSON payload
    pub fn on_value<F>(self, contract_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value, &Metadata, &ProjectingContext) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.on::<serde_json::Value, _>(contract_name, handler)
    }

    pub fn build(self) -> Projection {
        Projection {
            name: self.name,
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Deserialize)]
    struct Deposited {
        amount: u64,
    }

    fn ctx() -> ProjectingContext {
        ProjectingContext {
            projector_name: "p".into(),
            projection_name: "balances".into(),
            position: 1,
            stream: "account-1".into(),
            version: 1,
            message_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            contract_name: "deposited".into(),
            created_at: Utc::now(),
            attempt: 1,
        }
    }

    #[test]
    fn test_dispatch_by_contract() {
        let total = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&total);
        let projection = Projection::builder("balances")
            .on::<Deposited, _>("deposited", move |msg, _, _| {
                sink.fetch_add(msg.amount, Ordering::SeqCst);
                Ok(())
            })
            .build();

        let meta = Metadata::new();
        let outcome = projection.dispatch("deposited", serde_json::json!({"amount": 5}), &meta, &ctx());
        assert!(matches!(outcome, Some(Ok(()))));
        assert_eq!(total.load(Ordering::SeqCst), 5);

        assert!(projection
            .dispatch("withdrawn", serde_json::json!({}), &meta, &ctx())
            .is_none());
    }

    #[test]
    fn test_payload_shape_mismatch_is_handler_error() {
        let projection = Projection::builder("balances")
            .on::<Deposited, _>("deposited", |_, _, _| Ok(()))
            .build();

        let outcome = projection.dispatch(
            "deposited",
            serde_json::json!({"amount": "lots"}),
            &Metadata::new(),
            &ctx(),
        );
        assert!(matches!(outcome, Some(Err(_))));
    }
}
