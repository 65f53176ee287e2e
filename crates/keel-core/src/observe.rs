//! Optional metrics instrumentation for Keel.
//!
//! When the `observe` feature is enabled, key operations emit counters and
//! histograms via the [`metrics`] crate. A downstream application must
//! install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a committed append.
///
/// - `keel.store.appends_total` – counter
/// - `keel.store.messages_appended_total` – counter
/// - `keel.store.append_duration_seconds` – histogram
#[inline]
pub fn record_append(duration: std::time::Duration, messages: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("keel.store.appends_total").increment(1);
        metrics::counter!("keel.store.messages_appended_total").increment(messages as u64);
        metrics::histogram!("keel.store.append_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, messages);
    }
}

/// Record an optimistic concurrency conflict.
///
/// - `keel.store.conflicts_total` – counter
#[inline]
pub fn record_conflict() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("keel.store.conflicts_total").increment(1);
    }
}

/// Record one projector cycle for one projection.
///
/// - `keel.projector.cycle_duration_seconds` – histogram
/// - `keel.projector.messages_total` – counter with `projection` label
/// - `keel.projector.faults_total` – counter with `projection` label
#[inline]
pub fn record_projector_cycle(
    projection: &str,
    duration: std::time::Duration,
    messages: usize,
    faulted: bool,
) {
    #[cfg(feature = "observe")]
    {
        let projection = projection.to_string();
        metrics::histogram!("keel.projector.cycle_duration_seconds")
            .record(duration.as_secs_f64());
        metrics::counter!("keel.projector.messages_total", "projection" => projection.clone())
            .increment(messages as u64);
        if faulted {
            metrics::counter!("keel.projector.faults_total", "projection" => projection)
                .increment(1);
        }
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projection, duration, messages, faulted);
    }
}

/// Set the lag gauge of a projector.
///
/// - `keel.projector.lag` – gauge with `projector` label
#[inline]
pub fn set_projector_lag(projector: &str, lag: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("keel.projector.lag", "projector" => projector.to_string()).set(lag as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projector, lag);
    }
}
