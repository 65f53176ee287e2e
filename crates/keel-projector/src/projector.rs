use chrono::Utc;
use keel_core::{
    codec::{JsonCodec, MessageCodec},
    error::{KeelError, Result},
    observe,
    traits::{CheckpointRepository, StreamDataSource},
    types::{Position, ProjectionCheckpoint, RecordedMessage},
    ProjectorConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::projection::{ProjectingContext, Projection};
use crate::result::{DispatchingResult, ProjectingError, RunSummary};
use crate::upconvert::{upconvert_until, ContractMessage, UpConverterFactory};

type ErrorCallback = Box<dyn Fn(&ProjectingError) + Send + Sync>;

/// Where a projector is in its current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorState {
    Idle,
    PreparingCheckpoints,
    RunningCycle,
    /// The last run stopped on a captured fault or an error
    Faulted,
}

/// A projection bound to its checkpoint
#[derive(Debug)]
pub struct ProjectionDescriptor {
    projection: Projection,
    checkpoint: Option<ProjectionCheckpoint>,
}

impl ProjectionDescriptor {
    pub fn name(&self) -> &str {
        self.projection.name()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// `None` until checkpoints have been prepared
    pub fn checkpoint(&self) -> Option<&ProjectionCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn is_dropped(&self) -> bool {
        self.checkpoint.as_ref().is_some_and(|cp| cp.is_dropped())
    }

    fn is_active(&self) -> bool {
        self.checkpoint.is_some() && !self.is_dropped()
    }
}

/// Stops a projector's continuous loop
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // stores a permit if the loop is not waiting yet
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Totals of a continuous run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectorReport {
    pub projector: String,
    pub runs: u64,
    pub messages: u64,
    pub faults: u64,
}

enum Attempt {
    Dispatched,
    Skipped,
}

/// Builder for projectors
///
/// # Example
///
/// ```ignore
/// let mut projector = ProjectorBuilder::new("read-models", store.clone(), checkpoints)
///     .add_projection(order_totals)
///     .with_config(ProjectorConfig::new().with_batch_size(500))
///     .on_projecting_error(|e| eprintln!("{e}"))
///     .build()?;
///
/// let results = projector.run().await?;
/// ```
pub struct ProjectorBuilder<D, R> {
    name: String,
    data_source: Arc<D>,
    checkpoints: Arc<R>,
    projections: Vec<Projection>,
    codec: Arc<dyn MessageCodec>,
    up_converters: Option<Arc<dyn UpConverterFactory>>,
    on_error: Option<ErrorCallback>,
    notify: Option<Arc<Notify>>,
    config: ProjectorConfig,
}

impl<D, R> ProjectorBuilder<D, R>
where
    D: StreamDataSource,
    R: CheckpointRepository,
{
    pub fn new(name: impl Into<String>, data_source: Arc<D>, checkpoints: Arc<R>) -> Self {
        Self {
            name: name.into(),
            data_source,
            checkpoints,
            projections: Vec::new(),
            codec: Arc::new(JsonCodec),
            up_converters: None,
            on_error: None,
            notify: None,
            config: ProjectorConfig::default(),
        }
    }

    /// Add a projection; a second projection with the same name is ignored
    pub fn add_projection(mut self, projection: Projection) -> Self {
        if self.projections.iter().any(|p| p.name() == projection.name()) {
            tracing::debug!(
                projector = %self.name,
                projection = %projection.name(),
                "Ignoring duplicate projection"
            );
            return self;
        }
        self.projections.push(projection);
        self
    }

    pub fn with_up_converter_factory(mut self, factory: Arc<dyn UpConverterFactory>) -> Self {
        self.up_converters = Some(factory);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Called once for every projection that exhausts its retries
    pub fn on_projecting_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProjectingError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Wake the continuous loop on appends instead of waiting a full poll
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn with_config(mut self, config: ProjectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Projector<D, R>> {
        self.config.validate()?;
        if self.name.is_empty() {
            return Err(KeelError::Config("projector name must not be empty".into()));
        }

        Ok(Projector {
            name: self.name,
            data_source: self.data_source,
            checkpoints: self.checkpoints,
            descriptors: self
                .projections
                .into_iter()
                .map(|projection| ProjectionDescriptor {
                    projection,
                    checkpoint: None,
                })
                .collect(),
            codec: self.codec,
            up_converters: self.up_converters,
            on_error: self.on_error,
            notify: self.notify,
            config: self.config,
            state: ProjectorState::Idle,
            shutdown: ShutdownHandle::new(),
        })
    }
}

/// Catch-up engine dispatching the log into projections
///
/// Each projection advances independently: a faulted projection keeps its
/// checkpoint while the others move on.
pub struct Projector<D, R> {
    name: String,
    data_source: Arc<D>,
    checkpoints: Arc<R>,
    descriptors: Vec<ProjectionDescriptor>,
    codec: Arc<dyn MessageCodec>,
    up_converters: Option<Arc<dyn UpConverterFactory>>,
    on_error: Option<ErrorCallback>,
    notify: Option<Arc<Notify>>,
    config: ProjectorConfig,
    state: ProjectorState,
    shutdown: ShutdownHandle,
}

impl<D, R> Projector<D, R>
where
    D: StreamDataSource,
    R: CheckpointRepository,
{
    pub fn builder(
        name: impl Into<String>,
        data_source: Arc<D>,
        checkpoints: Arc<R>,
    ) -> ProjectorBuilder<D, R> {
        ProjectorBuilder::new(name, data_source, checkpoints)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProjectorState {
        self.state
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// All registered projections, dropped ones included
    pub fn projections(&self) -> &[ProjectionDescriptor] {
        &self.descriptors
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Bind every projection to its checkpoint
    ///
    /// Creates missing checkpoints and deletes the ones whose projection is
    /// no longer registered.
    pub async fn prepare_checkpoints(&mut self) -> Result<()> {
        self.state = ProjectorState::PreparingCheckpoints;

        let stored = self.checkpoints.fetch(&self.name).await?;

        for descriptor in &mut self.descriptors {
            let checkpoint = match stored
                .iter()
                .find(|cp| cp.projection_name == descriptor.projection.name())
            {
                Some(cp) => cp.clone(),
                None => {
                    self.checkpoints
                        .add(&self.name, descriptor.projection.name())
                        .await?
                }
            };
            descriptor.checkpoint = Some(checkpoint);
        }

        let stale: Vec<ProjectionCheckpoint> = stored
            .into_iter()
            .filter(|cp| {
                !self
                    .descriptors
                    .iter()
                    .any(|d| d.projection.name() == cp.projection_name)
            })
            .collect();

        if !stale.is_empty() {
            tracing::info!(
                projector = %self.name,
                count = stale.len(),
                "Deleting checkpoints of unregistered projections"
            );
            self.checkpoints.delete(&stale).await?;
        }

        Ok(())
    }

    /// One cycle over every active projection
    ///
    /// Requires prepared checkpoints; [`run`](Self::run) prepares them.
    ///
    /// Leaves the projector `Idle`, or `Faulted` when a projection faulted
    /// or the cycle failed.
    pub async fn run_once(&mut self) -> Result<Vec<DispatchingResult>> {
        self.state = ProjectorState::RunningCycle;
        let outcome = self.run_cycle().await;
        self.state = match &outcome {
            Ok(results) if !results.iter().any(DispatchingResult::has_error) => {
                ProjectorState::Idle
            }
            _ => ProjectorState::Faulted,
        };
        outcome
    }

    async fn run_cycle(&mut self) -> Result<Vec<DispatchingResult>> {
        let mut results = Vec::with_capacity(self.descriptors.len());

        for index in 0..self.descriptors.len() {
            if !self.descriptors[index].is_active() {
                continue;
            }
            results.push(self.run_projection(index).await?);
        }

        Ok(results)
    }

    async fn run_projection(&mut self, index: usize) -> Result<DispatchingResult> {
        let start = Instant::now();
        let after = self.descriptors[index]
            .checkpoint
            .as_ref()
            .map_or(0, |cp| cp.position);

        let messages = self
            .data_source
            .read_all_forward(after, self.config.batch_size)
            .await?;

        let descriptor = &self.descriptors[index];
        let mut dispatched = 0;
        let mut error = None;

        for message in &messages {
            match self.dispatch_with_retry(descriptor, message).await {
                Ok(Attempt::Dispatched) => dispatched += 1,
                Ok(Attempt::Skipped) => {}
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let projection_name = descriptor.projection.name().to_string();
        let checkpoint = self.descriptors[index]
            .checkpoint
            .as_mut()
            .ok_or_else(|| KeelError::Checkpoint(format!(
                "checkpoint of projection '{}' is not prepared",
                projection_name
            )))?;

        match (&error, messages.last()) {
            (None, Some(last)) => {
                checkpoint.advance_to(last.position);
                self.checkpoints.update(checkpoint).await?;
            }
            (Some(e), _) => {
                tracing::error!(projector = %self.name, error = %e, "Projection faulted");
                if self.config.drop_failing_projections {
                    checkpoint.dropped_at = Some(Utc::now());
                    self.checkpoints.update(checkpoint).await?;
                    tracing::warn!(
                        projector = %self.name,
                        projection = %projection_name,
                        "Dropped failing projection"
                    );
                }
                if let Some(callback) = &self.on_error {
                    callback(e);
                }
            }
            (None, None) => {}
        }

        let elapsed = start.elapsed();
        observe::record_projector_cycle(&projection_name, elapsed, messages.len(), error.is_some());

        tracing::trace!(
            projector = %self.name,
            projection = %projection_name,
            messages = messages.len(),
            dispatched,
            "Projection cycle finished"
        );

        Ok(DispatchingResult {
            projection_name,
            messages: messages.len(),
            dispatched,
            elapsed,
            error,
        })
    }

    async fn dispatch_with_retry(
        &self,
        descriptor: &ProjectionDescriptor,
        message: &RecordedMessage,
    ) -> std::result::Result<Attempt, ProjectingError> {
        let max_attempts = self.config.max_projecting_retries;
        let mut attempt = 1u8;

        loop {
            match self.try_dispatch(descriptor, message, attempt) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt >= max_attempts => {
                    return Err(ProjectingError {
                        projector: self.name.clone(),
                        projection: descriptor.projection.name().to_string(),
                        contract_name: message.contract_name.clone(),
                        position: message.position,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        projector = %self.name,
                        projection = %descriptor.projection.name(),
                        position = message.position,
                        attempt,
                        error = %e,
                        "Handler failed, retrying"
                    );
                    if self.config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn try_dispatch(
        &self,
        descriptor: &ProjectionDescriptor,
        message: &RecordedMessage,
        attempt: u8,
    ) -> anyhow::Result<Attempt> {
        let projection = &descriptor.projection;

        let resolved = if projection.handles(&message.contract_name) {
            Some(ContractMessage::new(
                message.contract_name.clone(),
                self.codec.decode_value(&message.payload)?,
            ))
        } else if let Some(factory) = &self.up_converters {
            if factory.create_for(&message.contract_name).is_none() {
                None
            } else {
                let original = ContractMessage::new(
                    message.contract_name.clone(),
                    self.codec.decode_value(&message.payload)?,
                );
                upconvert_until(factory.as_ref(), original, |c| projection.handles(c))?
            }
        } else {
            None
        };

        let Some(resolved) = resolved else {
            return Ok(Attempt::Skipped);
        };

        let metadata = self.codec.decode_metadata(message.metadata.as_deref())?;
        let ctx = ProjectingContext::new(&self.name, projection.name(), message, attempt);

        match projection.dispatch(&resolved.contract_name, resolved.payload, &metadata, &ctx) {
            Some(outcome) => outcome.map(|()| Attempt::Dispatched),
            None => Ok(Attempt::Skipped),
        }
    }

    /// Prepare checkpoints and run cycles until one consumes nothing
    ///
    /// Stops at the first cycle with a captured fault and returns the
    /// results gathered so far. A signalled shutdown also ends the run
    /// after the current cycle.
    pub async fn run(&mut self) -> Result<Vec<DispatchingResult>> {
        match self.run_inner().await {
            Ok(results) => Ok(results),
            Err(e) => {
                self.state = ProjectorState::Faulted;
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<Vec<DispatchingResult>> {
        self.prepare_checkpoints().await?;

        let mut all = Vec::new();
        loop {
            let head = self.data_source.read_head_position().await?;
            let results = self.run_once().await?;
            let consumed: usize = results.iter().map(|r| r.messages).sum();
            let faulted = results.iter().any(DispatchingResult::has_error);
            all.extend(results);

            if faulted {
                self.state = ProjectorState::Faulted;
                log_summary(&self.name, &all);
                return Ok(all);
            }
            if consumed == 0 {
                self.advance_to_head(head).await?;
                break;
            }
            if self.shutdown.is_shutdown() {
                tracing::debug!(projector = %self.name, "Shutdown requested, leaving run early");
                break;
            }
        }

        self.state = ProjectorState::Idle;
        log_summary(&self.name, &all);
        Ok(all)
    }

    /// Move caught-up checkpoints over positions that no longer hold messages
    ///
    /// `head` must be read before the cycle that found nothing new, so every
    /// message at or below it was visible to that cycle.
    async fn advance_to_head(&mut self, head: Position) -> Result<()> {
        for descriptor in &mut self.descriptors {
            if !descriptor.is_active() {
                continue;
            }
            if let Some(checkpoint) = descriptor.checkpoint.as_mut() {
                if checkpoint.position < head {
                    checkpoint.advance_to(head);
                    self.checkpoints.update(checkpoint).await?;
                }
            }
        }
        Ok(())
    }

    /// Messages between the head and the slowest active checkpoint
    pub async fn lag(&self) -> Result<u64> {
        let head = self.data_source.read_head_position().await?;
        let slowest = self
            .descriptors
            .iter()
            .filter(|d| d.is_active())
            .filter_map(|d| d.checkpoint.as_ref().map(|cp| cp.position))
            .min();

        let lag = slowest.map_or(0, |position| head.saturating_sub(position));
        observe::set_projector_lag(&self.name, lag);
        Ok(lag)
    }

    /// Run until shutdown is signalled through [`shutdown_handle`](Self::shutdown_handle)
    ///
    /// When caught up, waits for the append notification (if configured)
    /// or `poll_interval_ms`. A faulted run backs off for `error_backoff_ms`.
    pub async fn run_continuous(&mut self) -> ProjectorReport {
        let mut report = ProjectorReport {
            projector: self.name.clone(),
            ..Default::default()
        };

        tracing::info!(projector = %self.name, "Projector started");

        while !self.shutdown.is_shutdown() {
            report.runs += 1;
            match self.run().await {
                Ok(results) => {
                    let summary = RunSummary::from_results(&results);
                    report.messages += summary.messages as u64;

                    if summary.faults > 0 {
                        report.faults += 1;
                        self.pause(self.config.error_backoff_ms, false).await;
                    } else {
                        self.pause(self.config.poll_interval_ms, true).await;
                    }
                }
                Err(e) => {
                    report.faults += 1;
                    tracing::error!(projector = %self.name, error = %e, "Projector error");
                    self.pause(self.config.error_backoff_ms, false).await;
                }
            }
        }

        tracing::info!(
            projector = %self.name,
            runs = report.runs,
            messages = report.messages,
            "Projector shutdown"
        );
        report
    }

    async fn pause(&self, ms: u64, wake_on_append: bool) {
        let sleep = tokio::time::sleep(Duration::from_millis(ms));
        match (&self.notify, wake_on_append) {
            (Some(notify), true) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = self.shutdown.wake.notified() => {}
                    _ = sleep => {}
                }
            }
            _ => {
                tokio::select! {
                    _ = self.shutdown.wake.notified() => {}
                    _ = sleep => {}
                }
            }
        }
    }
}

fn log_summary(projector: &str, results: &[DispatchingResult]) {
    let summary = RunSummary::from_results(results);
    if summary.messages == 0 {
        tracing::trace!(projector, "No new messages");
        return;
    }

    tracing::info!(
        projector,
        messages = summary.messages,
        dispatched = summary.dispatched,
        faults = summary.faults,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        throughput = summary.throughput(),
        "Projector run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryCheckpoints, InMemorySource};
    use crate::upconvert::DefaultUpConverterFactory;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;

    #[derive(Deserialize)]
    struct Deposited {
        amount: i64,
    }

    fn seed(source: &InMemorySource, count: usize) {
        for i in 0..count {
            source.push("account-1", "deposited", serde_json::json!({ "amount": i as i64 }));
        }
    }

    fn sum_projection(name: &str, total: Arc<Mutex<i64>>) -> Projection {
        Projection::builder(name)
            .on::<Deposited, _>("deposited", move |msg, _, _| {
                *total.lock() += msg.amount;
                Ok(())
            })
            .build()
    }

    #[tokio::test]
    async fn test_run_reaches_fixed_point() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 25);
        source.push("other", "ignored", serde_json::json!({}));

        let total = Arc::new(Mutex::new(0));
        let mut projector = ProjectorBuilder::new("p", Arc::clone(&source), Arc::clone(&checkpoints))
            .add_projection(sum_projection("sums", Arc::clone(&total)))
            .with_config(ProjectorConfig::new().with_batch_size(10))
            .build()
            .unwrap();

        let results = projector.run().await.unwrap();

        assert_eq!(*total.lock(), (0..25).sum::<i64>());
        assert_eq!(projector.state(), ProjectorState::Idle);
        assert_eq!(checkpoints.get("p", "sums").unwrap().position, 26);
        assert_eq!(results.iter().map(|r| r.messages).sum::<usize>(), 26);
        assert_eq!(results.iter().map(|r| r.dispatched).sum::<usize>(), 25);
        assert_eq!(projector.lag().await.unwrap(), 0);

        // a second run finds nothing new
        let again = projector.run().await.unwrap();
        assert!(again.iter().all(|r| r.messages == 0));
        assert_eq!(*total.lock(), (0..25).sum::<i64>());
    }

    #[tokio::test]
    async fn test_failing_handler_is_retried_then_faults() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 3);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let failing = Projection::builder("failing")
            .on::<Deposited, _>("deposited", move |msg, _, _| {
                if msg.amount == 1 {
                    counted.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("cannot apply");
                }
                Ok(())
            })
            .build();

        let reported = Arc::new(AtomicUsize::new(0));
        let reported_clone = Arc::clone(&reported);
        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(failing)
            .on_projecting_error(move |e| {
                assert_eq!(e.attempts, 3);
                assert_eq!(e.position, 2);
                reported_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let results = projector.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert_eq!(projector.state(), ProjectorState::Faulted);
        assert!(results.iter().any(DispatchingResult::has_error));

        let checkpoint = checkpoints.get("p", "failing").unwrap();
        assert!(checkpoint.position < 2);
        assert!(!checkpoint.is_dropped());
    }

    #[tokio::test]
    async fn test_handler_recovers_within_retries() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let flaky = Projection::builder("flaky")
            .on_value("deposited", move |_, _, ctx| {
                counted.fetch_add(1, Ordering::SeqCst);
                if ctx.attempt < 2 {
                    anyhow::bail!("transient");
                }
                Ok(())
            })
            .build();

        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(flaky)
            .build()
            .unwrap();

        let results = projector.run().await.unwrap();
        assert!(results.iter().all(|r| !r.has_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(checkpoints.get("p", "flaky").unwrap().position, 1);
    }

    #[tokio::test]
    async fn test_fault_does_not_block_other_projections() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 4);

        let total = Arc::new(Mutex::new(0));
        let broken = Projection::builder("broken")
            .on_value("deposited", |_, _, _| anyhow::bail!("always"))
            .build();

        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(broken)
            .add_projection(sum_projection("sums", Arc::clone(&total)))
            .with_config(
                ProjectorConfig::new()
                    .with_max_projecting_retries(1)
                    .with_drop_failing_projections(true),
            )
            .build()
            .unwrap();

        projector.run().await.unwrap();
        assert_eq!(*total.lock(), 6);
        assert_eq!(checkpoints.get("p", "sums").unwrap().position, 4);

        let broken = checkpoints.get("p", "broken").unwrap();
        assert_eq!(broken.position, 0);
        assert!(broken.is_dropped());

        // dropped projections stay listed but are not run
        let results = projector.run().await.unwrap();
        assert!(results.iter().all(|r| r.projection_name == "sums"));
        assert_eq!(projector.projections().len(), 2);
        assert!(projector.projections()[0].is_dropped());
    }

    #[tokio::test]
    async fn test_prepare_deletes_unregistered_checkpoints() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        checkpoints.add("p", "retired").await.unwrap();
        checkpoints.add("other", "retired").await.unwrap();

        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(sum_projection("sums", Arc::new(Mutex::new(0))))
            .add_projection(sum_projection("sums", Arc::new(Mutex::new(0))))
            .build()
            .unwrap();
        projector.prepare_checkpoints().await.unwrap();

        assert_eq!(projector.projections().len(), 1);
        assert!(checkpoints.get("p", "retired").is_none());
        assert!(checkpoints.get("other", "retired").is_some());
        assert!(checkpoints.get("p", "sums").is_some());
    }

    #[tokio::test]
    async fn test_old_contracts_are_up_converted() {
        #[derive(Deserialize)]
        struct DepositedV1 {
            cents: i64,
        }

        #[derive(serde::Serialize)]
        struct DepositedV2 {
            amount: i64,
        }

        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        source.push("account-1", "deposited-v1", serde_json::json!({ "cents": 700 }));
        seed(&source, 2);

        let factory =
            DefaultUpConverterFactory::new().register_fn("deposited-v1", "deposited", |old: DepositedV1| {
                DepositedV2 {
                    amount: old.cents / 100,
                }
            });

        let total = Arc::new(Mutex::new(0));
        let mut projector = ProjectorBuilder::new("p", source, checkpoints)
            .add_projection(sum_projection("sums", Arc::clone(&total)))
            .with_up_converter_factory(Arc::new(factory))
            .build()
            .unwrap();

        let results = projector.run().await.unwrap();
        assert_eq!(*total.lock(), 7 + 1);
        assert_eq!(results.iter().map(|r| r.dispatched).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn test_checkpoint_reaches_head_after_tail_delete() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 1);
        source.push("account-2", "deposited", serde_json::json!({ "amount": 9 }));
        source.remove_stream("account-2");

        let total = Arc::new(Mutex::new(0));
        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(sum_projection("sums", Arc::clone(&total)))
            .build()
            .unwrap();

        projector.run().await.unwrap();

        assert_eq!(*total.lock(), 0);
        assert_eq!(checkpoints.get("p", "sums").unwrap().position, 2);
        assert_eq!(projector.lag().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_once_settles_state() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 2);

        let mut projector = ProjectorBuilder::new("p", Arc::clone(&source), Arc::clone(&checkpoints))
            .add_projection(sum_projection("sums", Arc::new(Mutex::new(0))))
            .build()
            .unwrap();
        projector.prepare_checkpoints().await.unwrap();
        projector.run_once().await.unwrap();
        assert_eq!(projector.state(), ProjectorState::Idle);

        let broken = Projection::builder("broken")
            .on_value("deposited", |_, _, _| anyhow::bail!("always"))
            .build();
        let mut projector = ProjectorBuilder::new("p", source, checkpoints)
            .add_projection(broken)
            .with_config(ProjectorConfig::new().with_max_projecting_retries(1))
            .build()
            .unwrap();
        projector.prepare_checkpoints().await.unwrap();
        let results = projector.run_once().await.unwrap();
        assert!(results[0].has_error());
        assert_eq!(projector.state(), ProjectorState::Faulted);
    }

    #[tokio::test]
    async fn test_shutdown_ends_run_with_backlog() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 2000);

        let slot: Arc<Mutex<Option<ShutdownHandle>>> = Arc::new(Mutex::new(None));
        let trigger = Arc::clone(&slot);
        let seen = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&seen);
        let stopping = Projection::builder("stopping")
            .on_value("deposited", move |_, _, _| {
                if counted.fetch_add(1, Ordering::SeqCst) + 1 == 50 {
                    if let Some(handle) = trigger.lock().as_ref() {
                        handle.shutdown();
                    }
                }
                Ok(())
            })
            .build();

        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(stopping)
            .with_config(ProjectorConfig::new().with_batch_size(10))
            .build()
            .unwrap();
        *slot.lock() = Some(projector.shutdown_handle());

        let report = tokio::time::timeout(Duration::from_secs(2), projector.run_continuous())
            .await
            .unwrap();

        assert_eq!(report.runs, 1);
        assert_eq!(report.messages, 50);
        assert_eq!(seen.load(Ordering::SeqCst), 50);
        assert_eq!(checkpoints.get("p", "stopping").unwrap().position, 50);
        assert_eq!(projector.state(), ProjectorState::Idle);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ProjectorBuilder::new(
            "p",
            Arc::new(InMemorySource::default()),
            Arc::new(InMemoryCheckpoints::default()),
        )
        .with_config(ProjectorConfig::new().with_max_projecting_retries(0))
        .build();
        assert!(matches!(result, Err(KeelError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_continuous_stops_on_shutdown() {
        let source = Arc::new(InMemorySource::default());
        let checkpoints = Arc::new(InMemoryCheckpoints::default());
        seed(&source, 5);

        let total = Arc::new(Mutex::new(0));
        let mut projector = ProjectorBuilder::new("p", source, Arc::clone(&checkpoints))
            .add_projection(sum_projection("sums", Arc::clone(&total)))
            .with_config(ProjectorConfig::new().with_poll_interval_ms(10))
            .build()
            .unwrap();

        let handle = projector.shutdown_handle();
        let task = tokio::spawn(async move { projector.run_continuous().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(report.runs >= 1);
        assert_eq!(report.messages, 5);
        assert_eq!(*total.lock(), 10);
    }
}
