use crate::error::Result;
use crate::types::ProjectionCheckpoint;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable storage for projection checkpoints
///
/// Checkpoints are keyed by (projector name, projection name).
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// All checkpoints of one projector
    async fn fetch(&self, projector_name: &str) -> Result<Vec<ProjectionCheckpoint>>;

    /// Create a checkpoint at position 0
    async fn add(&self, projector_name: &str, projection_name: &str)
        -> Result<ProjectionCheckpoint>;

    /// Persist position and dropped marker
    async fn update(&self, checkpoint: &ProjectionCheckpoint) -> Result<()>;

    /// Delete the given checkpoints
    async fn delete(&self, checkpoints: &[ProjectionCheckpoint]) -> Result<()>;
}

#[async_trait]
impl<T: CheckpointRepository + ?Sized> CheckpointRepository for Arc<T> {
    async fn fetch(&self, projector_name: &str) -> Result<Vec<ProjectionCheckpoint>> {
        (**self).fetch(projector_name).await
    }

    async fn add(
        &self,
        projector_name: &str,
        projection_name: &str,
    ) -> Result<ProjectionCheckpoint> {
        (**self).add(projector_name, projection_name).await
    }

    async fn update(&self, checkpoint: &ProjectionCheckpoint) -> Result<()> {
        (**self).update(checkpoint).await
    }

    async fn delete(&self, checkpoints: &[ProjectionCheckpoint]) -> Result<()> {
        (**self).delete(checkpoints).await
    }
}
