use keel_core::Position;
use std::time::Duration;
use thiserror::Error;

/// A projection gave up on a message after exhausting its retries
#[derive(Error, Debug)]
#[error(
    "projection '{projection}' of projector '{projector}' failed on '{contract_name}' \
     at position {position} after {attempts} attempts: {source}"
)]
pub struct ProjectingError {
    pub projector: String,
    pub projection: String,
    pub contract_name: String,
    pub position: Position,
    pub attempts: u8,
    pub source: anyhow::Error,
}

/// Outcome of one cycle for one projection
#[derive(Debug)]
pub struct DispatchingResult {
    pub projection_name: String,

    /// Messages fetched for this projection
    pub messages: usize,

    /// Messages a handler accepted
    pub dispatched: usize,

    pub elapsed: Duration,

    pub error: Option<ProjectingError>,
}

impl DispatchingResult {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn any_dispatched(&self) -> bool {
        self.dispatched > 0
    }
}

/// Totals across a set of results
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub messages: usize,
    pub dispatched: usize,
    pub faults: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn from_results(results: &[DispatchingResult]) -> Self {
        results.iter().fold(Self::default(), |mut acc, r| {
            acc.messages += r.messages;
            acc.dispatched += r.dispatched;
            acc.faults += usize::from(r.has_error());
            acc.elapsed += r.elapsed;
            acc
        })
    }

    /// Dispatched messages per second of handler time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.dispatched as f64 / secs
        } else {
            0.0
        }
    }
}
