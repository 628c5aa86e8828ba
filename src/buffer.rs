use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::span::SpanData;
use crate::stats::HealthStats;
use crate::writer::WriterMessage;

#[derive(Clone, Debug)]
pub(crate) struct BufferConfig {
    /// A trace reaching this many buffered spans is flushed partial.
    pub(crate) max_spans_per_trace: usize,
    /// A trace older than this is flushed partial.
    pub(crate) max_trace_age: Duration,
}

#[derive(Debug)]
struct TraceEntry {
    spans: Vec<SpanData>,
    seen: HashSet<u64>,
    first_push: Instant,
}

/// Groups finished spans by trace id and hands completed (or time/size boxed
/// partial) traces to the writer queue.
///
/// `push` arrives concurrently from every producer thread; the index lock is
/// held only for map mutation and the queue handoff is a `try_send`, so a
/// slow or unreachable collector can never block a producer. A full queue
/// drops the trace and records the drop.
#[derive(Debug)]
pub(crate) struct TraceBuffer {
    entries: Mutex<HashMap<u64, TraceEntry>>,
    sender: SyncSender<WriterMessage>,
    config: BufferConfig,
    stats: Arc<HealthStats>,
}

impl TraceBuffer {
    pub(crate) fn new(
        sender: SyncSender<WriterMessage>,
        config: BufferConfig,
        stats: Arc<HealthStats>,
    ) -> Self {
        TraceBuffer {
            entries: Mutex::new(HashMap::new()),
            sender,
            config,
            stats,
        }
    }

    pub(crate) fn note_finished(&self) {
        self.stats.spans_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> &HealthStats {
        &self.stats
    }

    /// Appends a finished span to its trace. Idempotent per span id. When the
    /// local root has arrived, or the trace exceeds its span or age budget,
    /// the trace leaves the index and moves to the writer queue.
    pub(crate) fn push(&self, span: SpanData) {
        let ready = {
            let Ok(mut entries) = self.entries.lock() else {
                return;
            };
            let trace_id = span.trace_id;
            let entry = entries.entry(trace_id).or_insert_with(|| TraceEntry {
                spans: Vec::new(),
                seen: HashSet::new(),
                first_push: Instant::now(),
            });
            if !entry.seen.insert(span.span_id) {
                return;
            }
            let root_arrived = span.local_root;
            entry.spans.push(span);
            let over_budget = entry.spans.len() >= self.config.max_spans_per_trace
                || entry.first_push.elapsed() >= self.config.max_trace_age;
            if root_arrived || over_budget {
                entries.remove(&trace_id).map(|entry| entry.spans)
            } else {
                None
            }
        };
        if let Some(spans) = ready {
            self.hand_off(spans);
        }
    }

    /// Flushes traces that exceeded their age budget without new pushes.
    /// Driven from the writer's timer tick.
    pub(crate) fn flush_stale(&self) {
        let stale = {
            let Ok(mut entries) = self.entries.lock() else {
                return;
            };
            let expired: Vec<u64> = entries
                .iter()
                .filter(|(_, entry)| entry.first_push.elapsed() >= self.config.max_trace_age)
                .map(|(trace_id, _)| *trace_id)
                .collect();
            expired
                .into_iter()
                .filter_map(|trace_id| entries.remove(&trace_id))
                .map(|entry| entry.spans)
                .collect::<Vec<_>>()
        };
        for spans in stale {
            self.hand_off(spans);
        }
    }

    /// Drains every open trace into the writer queue; used by forced flush
    /// and shutdown.
    pub(crate) fn flush_all(&self) {
        let drained = {
            let Ok(mut entries) = self.entries.lock() else {
                return;
            };
            entries
                .drain()
                .map(|(_, entry)| entry.spans)
                .collect::<Vec<_>>()
        };
        for spans in drained {
            self.hand_off(spans);
        }
    }

    #[cfg(test)]
    pub(crate) fn open_traces(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn hand_off(&self, spans: Vec<SpanData>) {
        let span_count = spans.len() as u64;
        match self.sender.try_send(WriterMessage::Traces(spans)) {
            Ok(()) => {
                self.stats.traces_flushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.spans_dropped.fetch_add(span_count, Ordering::Relaxed);
                if self.stats.traces_dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    tracing::warn!(
                        "trace writer queue is full; dropping traces until it drains \
                         (further drops are counted, not logged)"
                    );
                }
            }
        }
    }
}
