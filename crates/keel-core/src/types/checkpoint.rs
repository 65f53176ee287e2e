use crate::types::message::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable cursor of one projection inside one projector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    pub projector_name: String,

    /// Contract name of the projection
    pub projection_name: String,

    /// Last processed global position, 0 when nothing was processed
    pub position: Position,

    /// Set when the projection was dropped from processing
    pub dropped_at: Option<DateTime<Utc>>,
}

impl ProjectionCheckpoint {
    pub fn new(projector_name: impl Into<String>, projection_name: impl Into<String>) -> Self {
        Self {
            projector_name: projector_name.into(),
            projection_name: projection_name.into(),
            position: 0,
            dropped_at: None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped_at.is_some()
    }

    /// Move the cursor forward; never regresses
    pub fn advance_to(&mut self, position: Position) {
        if position > self.position {
            self.position = position;
        }
    }

    pub fn same_key(&self, other: &ProjectionCheckpoint) -> bool {
        self.projector_name == other.projector_name
            && self.projection_name == other.projection_name
    }
}
