use async_trait::async_trait;
use chrono::DateTime;
use keel_core::{
    error::{KeelError, Result},
    traits::CheckpointRepository,
    types::{Position, ProjectionCheckpoint},
    StoreConfig,
};
use rusqlite::{params, TransactionBehavior};
use std::sync::Arc;

use crate::connection::{map_sqlite_err, open_database, with_connection};

/// Checkpoint repository stored next to the message log
#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    config: Arc<StoreConfig>,
}

impl SqliteCheckpointRepository {
    /// Open a repository, installing the schema if needed
    pub fn open(config: StoreConfig) -> Result<Self> {
        open_database(&config)?;
        Ok(Self::from_config(Arc::new(config)))
    }

    pub(crate) fn from_config(config: Arc<StoreConfig>) -> Self {
        Self { config }
    }
}

fn map_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectionCheckpoint> {
    let dropped_at: Option<i64> = row.get(3)?;
    Ok(ProjectionCheckpoint {
        projector_name: row.get(0)?,
        projection_name: row.get(1)?,
        position: row.get::<_, i64>(2)?.max(0) as Position,
        dropped_at: dropped_at.and_then(DateTime::from_timestamp_millis),
    })
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn fetch(&self, projector_name: &str) -> Result<Vec<ProjectionCheckpoint>> {
        let projector = projector_name.to_string();
        with_connection(&self.config, move |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT projector_name, projection_name, message_position, dropped_at
                     FROM streams_projection_checkpoints
                     WHERE projector_name = ?1
                     ORDER BY projection_name",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map([&projector], map_checkpoint)
                .map_err(map_sqlite_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sqlite_err)
        })
        .await
    }

    async fn add(
        &self,
        projector_name: &str,
        projection_name: &str,
    ) -> Result<ProjectionCheckpoint> {
        let projector = projector_name.to_string();
        let projection = projection_name.to_string();

        let checkpoint = with_connection(&self.config, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO streams_projection_checkpoints
                     (projector_name, projection_name, message_position)
                 VALUES (?1, ?2, 0)",
                params![projector, projection],
            )
            .map_err(map_sqlite_err)?;

            conn.query_row(
                "SELECT projector_name, projection_name, message_position, dropped_at
                 FROM streams_projection_checkpoints
                 WHERE projector_name = ?1 AND projection_name = ?2",
                params![projector, projection],
                map_checkpoint,
            )
            .map_err(map_sqlite_err)
        })
        .await?;

        tracing::debug!(
            projector = %checkpoint.projector_name,
            projection = %checkpoint.projection_name,
            position = checkpoint.position,
            "Added checkpoint"
        );
        Ok(checkpoint)
    }

    async fn update(&self, checkpoint: &ProjectionCheckpoint) -> Result<()> {
        let cp = checkpoint.clone();

        let changed = with_connection(&self.config, move |conn| {
            conn.execute(
                "UPDATE streams_projection_checkpoints
                 SET message_position = MAX(message_position, ?3),
                     dropped_at = ?4
                 WHERE projector_name = ?1 AND projection_name = ?2",
                params![
                    cp.projector_name,
                    cp.projection_name,
                    cp.position as i64,
                    cp.dropped_at.map(|d| d.timestamp_millis()),
                ],
            )
            .map_err(map_sqlite_err)
        })
        .await?;

        if changed == 0 {
            return Err(KeelError::Checkpoint(format!(
                "no checkpoint for projection '{}' of projector '{}'",
                checkpoint.projection_name, checkpoint.projector_name
            )));
        }

        tracing::trace!(
            projector = %checkpoint.projector_name,
            projection = %checkpoint.projection_name,
            position = checkpoint.position,
            dropped = checkpoint.is_dropped(),
            "Updated checkpoint"
        );
        Ok(())
    }

    async fn delete(&self, checkpoints: &[ProjectionCheckpoint]) -> Result<()> {
        if checkpoints.is_empty() {
            return Ok(());
        }

        let keys: Vec<(String, String)> = checkpoints
            .iter()
            .map(|cp| (cp.projector_name.clone(), cp.projection_name.clone()))
            .collect();
        let count = keys.len();

        with_connection(&self.config, move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "DELETE FROM streams_projection_checkpoints
                         WHERE projector_name = ?1 AND projection_name = ?2",
                    )
                    .map_err(map_sqlite_err)?;
                for (projector, projection) in &keys {
                    stmt.execute(params![projector, projection])
                        .map_err(map_sqlite_err)?;
                }
            }
            tx.commit().map_err(map_sqlite_err)
        })
        .await?;

        tracing::debug!(count, "Deleted checkpoints");
        Ok(())
    }
}
