use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// State shared by every local span of one trace: the sampling decision and
/// the cross-process baggage. Keeping it in a single shared cell is what makes
/// a priority override or a baggage addition authoritative trace-wide without
/// any coordination between spans.
#[derive(Debug, Default)]
pub(crate) struct TraceState {
    sampled: AtomicBool,
    priority: Mutex<Option<i32>>,
    baggage: RwLock<HashMap<String, String>>,
}

/// The propagable identity of a position in a trace.
///
/// A `SpanContext` stays valid after its span finishes and clones are cheap
/// handles onto the same per-trace state, so it can be carried around for
/// injection independently of the span's lifetime.
#[derive(Clone, Debug)]
pub struct SpanContext {
    trace_id: u64,
    span_id: u64,
    remote: bool,
    state: Arc<TraceState>,
}

impl SpanContext {
    /// Context for a locally started root span. The sampler's verdict is
    /// recorded as the trace's initial priority.
    pub(crate) fn local_root(id: u64, sampled: bool, priority: i32) -> Self {
        SpanContext {
            trace_id: id,
            span_id: id,
            remote: false,
            state: Arc::new(TraceState {
                sampled: AtomicBool::new(sampled),
                priority: Mutex::new(Some(priority)),
                baggage: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Context reconstructed from carrier data extracted off the wire.
    /// Without an explicit priority the trace is kept; the collector owns the
    /// final verdict in that case.
    pub(crate) fn remote(
        trace_id: u64,
        span_id: u64,
        priority: Option<i32>,
        baggage: HashMap<String, String>,
    ) -> Self {
        let sampled = priority.map(|p| p > 0).unwrap_or(true);
        SpanContext {
            trace_id,
            span_id,
            remote: true,
            state: Arc::new(TraceState {
                sampled: AtomicBool::new(sampled),
                priority: Mutex::new(priority),
                baggage: RwLock::new(baggage),
            }),
        }
    }

    /// Context for a child span: same trace, same shared state, new span id.
    pub(crate) fn child(&self, span_id: u64) -> Self {
        SpanContext {
            trace_id: self.trace_id,
            span_id,
            remote: false,
            state: Arc::clone(&self.state),
        }
    }

    /// Context used by no-op spans handed out before init or after shutdown.
    pub(crate) fn disabled() -> Self {
        SpanContext {
            trace_id: 0,
            span_id: 0,
            remote: false,
            state: Arc::new(TraceState::default()),
        }
    }

    /// The identifier shared by every span of this trace.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// The identifier of the span this context belongs to.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Whether this context was extracted from a remote peer rather than
    /// created in-process.
    pub(crate) fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether spans of this trace are submitted for export on finish.
    pub fn is_sampled(&self) -> bool {
        self.state.sampled.load(Ordering::Relaxed)
    }

    /// The trace's sampling priority, if one has been decided.
    pub fn sampling_priority(&self) -> Option<i32> {
        self.state.priority.lock().ok().and_then(|p| *p)
    }

    /// Overrides the sampling decision for the whole trace. Positive
    /// priorities keep the trace.
    pub(crate) fn set_sampling_priority(&self, priority: i32) {
        if let Ok(mut slot) = self.state.priority.lock() {
            *slot = Some(priority);
        }
        self.state.sampled.store(priority > 0, Ordering::Relaxed);
    }

    /// Looks up a baggage item, returning `None` when unset.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.state
            .baggage
            .read()
            .ok()
            .and_then(|bag| bag.get(key).cloned())
    }

    /// Sets a baggage item, visible to every span of the trace and injected
    /// cross-process from now on.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut bag) = self.state.baggage.write() {
            bag.insert(key.into(), value.into());
        }
    }

    /// Immutable copy of the current baggage, taken at inject time.
    pub(crate) fn baggage_snapshot(&self) -> HashMap<String, String> {
        self.state
            .baggage
            .read()
            .map(|bag| bag.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::SpanContext;

    #[test]
    fn child_shares_trace_state() {
        let root = SpanContext::local_root(7, true, 1);
        let child = root.child(9);
        assert_eq!(child.trace_id(), 7);
        assert_eq!(child.span_id(), 9);

        root.set_baggage_item("account", "42");
        assert_eq!(child.baggage_item("account").as_deref(), Some("42"));

        child.set_sampling_priority(-1);
        assert!(!root.is_sampled());
        assert_eq!(root.sampling_priority(), Some(-1));
    }

    #[test]
    fn remote_context_defaults_to_kept_without_priority() {
        let cx = SpanContext::remote(1, 2, None, Default::default());
        assert!(cx.is_sampled());
        assert_eq!(cx.sampling_priority(), None);

        let rejected = SpanContext::remote(1, 2, Some(0), Default::default());
        assert!(!rejected.is_sampled());
    }
}
