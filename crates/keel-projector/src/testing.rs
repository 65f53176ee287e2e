//! In-memory collaborators for projector tests

use async_trait::async_trait;
use chrono::Utc;
use keel_core::{
    error::{KeelError, Result},
    traits::{CheckpointRepository, StreamDataSource},
    types::{Position, ProjectionCheckpoint, RecordedMessage},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Positions are never reused, even after [`remove_stream`](Self::remove_stream)
#[derive(Default)]
pub(crate) struct InMemorySource {
    messages: Mutex<Vec<RecordedMessage>>,
    head: AtomicU64,
}

impl InMemorySource {
    /// Append one message with the next position
    pub(crate) fn push(&self, stream: &str, contract_name: &str, payload: serde_json::Value) {
        let mut messages = self.messages.lock();
        let position = self.head.fetch_add(1, Ordering::SeqCst) + 1;
        let version = messages.iter().filter(|m| m.stream == stream).count() as u64 + 1;
        messages.push(RecordedMessage {
            position,
            stream: stream.to_string(),
            version,
            message_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            contract_name: contract_name.to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
            metadata: None,
            created_at: Utc::now(),
        });
    }

    pub(crate) fn remove_stream(&self, stream: &str) {
        self.messages.lock().retain(|m| m.stream != stream);
    }
}

#[async_trait]
impl StreamDataSource for InMemorySource {
    async fn read_all_forward(
        &self,
        after: Position,
        limit: usize,
    ) -> Result<Vec<RecordedMessage>> {
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| m.position > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn read_head_position(&self) -> Result<Position> {
        Ok(self.head.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub(crate) struct InMemoryCheckpoints {
    rows: Mutex<Vec<ProjectionCheckpoint>>,
}

impl InMemoryCheckpoints {
    pub(crate) fn get(&self, projector: &str, projection: &str) -> Option<ProjectionCheckpoint> {
        self.rows
            .lock()
            .iter()
            .find(|cp| cp.projector_name == projector && cp.projection_name == projection)
            .cloned()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpoints {
    async fn fetch(&self, projector_name: &str) -> Result<Vec<ProjectionCheckpoint>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|cp| cp.projector_name == projector_name)
            .cloned()
            .collect())
    }

    async fn add(
        &self,
        projector_name: &str,
        projection_name: &str,
    ) -> Result<ProjectionCheckpoint> {
        let checkpoint = ProjectionCheckpoint::new(projector_name, projection_name);
        self.rows.lock().push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn update(&self, checkpoint: &ProjectionCheckpoint) -> Result<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|cp| cp.same_key(checkpoint))
            .ok_or_else(|| KeelError::Checkpoint("missing checkpoint".into()))?;
        row.advance_to(checkpoint.position);
        row.dropped_at = checkpoint.dropped_at;
        Ok(())
    }

    async fn delete(&self, checkpoints: &[ProjectionCheckpoint]) -> Result<()> {
        self.rows
            .lock()
            .retain(|cp| !checkpoints.iter().any(|d| d.same_key(cp)));
        Ok(())
    }
}
