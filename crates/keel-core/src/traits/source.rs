use crate::error::Result;
use crate::types::{Position, RecordedMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Where a projector reads from
#[async_trait]
pub trait StreamDataSource: Send + Sync {
    /// Up to `limit` messages with position > `after`, ascending by position
    async fn read_all_forward(&self, after: Position, limit: usize)
        -> Result<Vec<RecordedMessage>>;

    /// Highest position currently readable
    async fn read_head_position(&self) -> Result<Position>;
}

#[async_trait]
impl<T: StreamDataSource + ?Sized> StreamDataSource for Arc<T> {
    async fn read_all_forward(
        &self,
        after: Position,
        limit: usize,
    ) -> Result<Vec<RecordedMessage>> {
        (**self).read_all_forward(after, limit).await
    }

    async fn read_head_position(&self) -> Result<Position> {
        (**self).read_head_position().await
    }
}
