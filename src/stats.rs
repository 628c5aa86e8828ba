use std::sync::atomic::{AtomicU64, Ordering};

/// Internal health counters for the tracing pipeline.
///
/// Telemetry loss is deliberate under pressure, but never silent: every drop
/// path increments one of these counters so the tracer's own health stays
/// observable.
#[derive(Debug, Default)]
pub(crate) struct HealthStats {
    pub(crate) spans_started: AtomicU64,
    pub(crate) spans_finished: AtomicU64,
    pub(crate) traces_flushed: AtomicU64,
    pub(crate) traces_dropped: AtomicU64,
    pub(crate) spans_dropped: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) batches_dropped: AtomicU64,
}

impl HealthStats {
    pub(crate) fn snapshot(&self) -> Health {
        Health {
            spans_started: self.spans_started.load(Ordering::Relaxed),
            spans_finished: self.spans_finished.load(Ordering::Relaxed),
            traces_flushed: self.traces_flushed.load(Ordering::Relaxed),
            traces_dropped: self.traces_dropped.load(Ordering::Relaxed),
            spans_dropped: self.spans_dropped.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of the tracer's health counters, returned by
/// [`Tracer::health`](crate::Tracer::health).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Health {
    /// Spans handed out by `start_span` (no-op spans excluded).
    pub spans_started: u64,
    /// Spans whose `finish` completed, sampled or not.
    pub spans_finished: u64,
    /// Traces handed to the writer queue.
    pub traces_flushed: u64,
    /// Traces lost to a full queue, batch shedding or export failure.
    pub traces_dropped: u64,
    /// Spans contained in dropped traces.
    pub spans_dropped: u64,
    /// Batches accepted by the collector agent.
    pub batches_sent: u64,
    /// Batches discarded after an encode or transport failure.
    pub batches_dropped: u64,
}
