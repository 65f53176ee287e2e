//! Supervision of independent projectors
//!
//! Each projector runs its continuous loop on its own tokio task. Projectors
//! share nothing in-process; they only meet in the store.

use keel_core::traits::{CheckpointRepository, StreamDataSource};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::projector::{Projector, ProjectorReport, ShutdownHandle};

type RunFuture = Pin<Box<dyn Future<Output = ProjectorReport> + Send>>;

struct Pending {
    name: String,
    run: RunFuture,
    run_for: Option<Duration>,
    handle: ShutdownHandle,
}

struct Running {
    name: String,
    task: JoinHandle<ProjectorReport>,
    timer: Option<JoinHandle<()>>,
    handle: ShutdownHandle,
}

/// Starts and stops a set of projectors
#[derive(Default)]
pub struct ProjectorRunner {
    pending: Vec<Pending>,
    running: Vec<Running>,
}

impl ProjectorRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projector
    ///
    /// With `run_for`, the projector shuts itself down after that duration.
    pub fn add<D, R>(&mut self, projector: Projector<D, R>, run_for: Option<Duration>)
    where
        D: StreamDataSource + 'static,
        R: CheckpointRepository + 'static,
    {
        let name = projector.name().to_string();
        let handle = projector.shutdown_handle();
        let mut projector = projector;
        let run: RunFuture = Box::pin(async move { projector.run_continuous().await });

        self.pending.push(Pending {
            name,
            run,
            run_for,
            handle,
        });
    }

    /// Spawn every projector added since the last start
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        for pending in self.pending.drain(..) {
            let timer = pending.run_for.map(|duration| {
                let handle = pending.handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    handle.shutdown();
                })
            });

            tracing::info!(projector = %pending.name, run_for = ?pending.run_for, "Starting projector");

            self.running.push(Running {
                name: pending.name,
                task: tokio::spawn(pending.run),
                timer,
                handle: pending.handle,
            });
        }
    }

    /// Number of spawned projectors
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Signal shutdown to all projectors and wait for them
    pub async fn stop(&mut self) -> Vec<ProjectorReport> {
        for running in &self.running {
            running.handle.shutdown();
        }

        let mut reports = Vec::with_capacity(self.running.len());
        for running in self.running.drain(..) {
            if let Some(timer) = running.timer {
                timer.abort();
            }
            match running.task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(projector = %running.name, error = %e, "Projector task failed");
                }
            }
        }

        tracing::info!(count = reports.len(), "Projectors stopped");
        reports
    }
}

impl Drop for ProjectorRunner {
    fn drop(&mut self) {
        for running in &self.running {
            running.handle.shutdown();
            if let Some(timer) = &running.timer {
                timer.abort();
            }
        }
    }
}
