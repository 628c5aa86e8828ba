use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::TraceBuffer;
use crate::context::SpanContext;
use crate::tags;

pub(crate) fn unix_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

pub(crate) fn now_nanos() -> i64 {
    unix_nanos(SystemTime::now())
}

/// A dynamically typed tag value.
///
/// Instrumentation can hand over strings, numbers, booleans or error values;
/// anything else is stringified up front via [`TagValue::display`].
#[derive(Debug)]
#[non_exhaustive]
pub enum TagValue {
    /// A string tag, stored in the span's meta mapping.
    Str(String),
    /// An integer metric, stored in the span's metrics mapping.
    Int(i64),
    /// A floating point metric, stored in the span's metrics mapping.
    Float(f64),
    /// A boolean; under [`tags::ERROR`] it marks or un-marks the error flag.
    Bool(bool),
    /// An error value captured with its message and type name.
    Error {
        /// The error's display output.
        message: String,
        /// The error's type name.
        kind: &'static str,
    },
    /// Fallback for values of any other kind, stringified at the boundary.
    Other(String),
}

impl TagValue {
    /// Stringifies an arbitrary value; the fallback for kinds without a
    /// dedicated variant.
    pub fn display<T: fmt::Display>(value: T) -> Self {
        TagValue::Other(value.to_string())
    }

    /// Captures an error value with its message and type name.
    pub fn error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        TagValue::Error {
            message: err.to_string(),
            kind: std::any::type_name::<E>(),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::Int(value as i64)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// Options accepted by [`Tracer::start_span`](crate::Tracer::start_span).
#[derive(Debug, Default)]
pub struct StartSpanOptions {
    pub(crate) service: Option<String>,
    pub(crate) resource: Option<String>,
    pub(crate) span_type: Option<String>,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) parent: Option<SpanContext>,
    pub(crate) tags: Vec<(String, TagValue)>,
}

impl StartSpanOptions {
    /// Overrides the tracer-wide service name for this span.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the resource name. Defaults to the operation name.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the span type, e.g. `web`, `db` or `cache`.
    pub fn with_span_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = Some(span_type.into());
        self
    }

    /// Uses an explicit start time instead of the current clock.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Makes the new span a child of `parent`, inheriting trace id, sampling
    /// state and baggage.
    pub fn child_of(mut self, parent: SpanContext) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds an initial tag, applied with the same semantics as
    /// [`Span::set_tag`].
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }
}

/// Options accepted by [`Span::finish_with`].
#[derive(Debug, Default)]
pub struct FinishOptions {
    pub(crate) finish_time: Option<SystemTime>,
    pub(crate) error: Option<TagValue>,
}

impl FinishOptions {
    /// Uses an explicit finish time instead of the current clock.
    pub fn with_finish_time(mut self, finish_time: SystemTime) -> Self {
        self.finish_time = Some(finish_time);
        self
    }

    /// Records `err` on the span before it freezes, equivalent to a final
    /// `set_tag(tags::ERROR, TagValue::error(err))`.
    pub fn with_error<E: std::error::Error + ?Sized>(mut self, err: &E) -> Self {
        self.error = Some(TagValue::error(err));
        self
    }
}

/// A finished span record, owned by the buffer and writer once the span
/// completes. The field layout mirrors the agent wire encoding.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Operation name.
    pub name: String,
    /// Service the span belongs to.
    pub service: String,
    /// Logical target of the operation.
    pub resource: String,
    /// Protocol or category of the span.
    pub span_type: String,
    /// Start time in nanoseconds since the Unix epoch.
    pub start: i64,
    /// Duration in nanoseconds.
    pub duration: i64,
    /// String tags.
    pub meta: HashMap<String, String>,
    /// Numeric metrics.
    pub metrics: HashMap<String, f64>,
    /// Identifier of this span.
    pub span_id: u64,
    /// Identifier shared by all spans of the trace.
    pub trace_id: u64,
    /// Identifier of the direct parent, 0 for a root span.
    pub parent_id: u64,
    /// Error flag, 0 when no error was recorded.
    pub error: i32,
    /// Whether this span is the local root of its trace. Never encoded; the
    /// buffer uses it to detect trace completion.
    pub(crate) local_root: bool,
}

#[derive(Debug)]
struct SpanState {
    name: String,
    service: String,
    resource: String,
    span_type: String,
    start: i64,
    duration: i64,
    meta: HashMap<String, String>,
    metrics: HashMap<String, f64>,
    error: i32,
}

#[derive(Debug)]
struct SpanInner {
    context: SpanContext,
    parent_id: u64,
    local_root: bool,
    finished: AtomicBool,
    state: RwLock<SpanState>,
    buffer: Option<Arc<TraceBuffer>>,
}

/// One timed unit of work.
///
/// All mutation is internally synchronized; a `Span` can be shared across
/// threads by cloning the handle, with no external locking. Once finished the
/// span freezes: further tag writes and repeated finishes are no-ops.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

#[allow(clippy::too_many_arguments)]
impl Span {
    pub(crate) fn start(
        context: SpanContext,
        parent_id: u64,
        local_root: bool,
        name: String,
        service: String,
        resource: String,
        span_type: String,
        start: i64,
        buffer: Option<Arc<TraceBuffer>>,
    ) -> Self {
        Span {
            inner: Arc::new(SpanInner {
                context,
                parent_id,
                local_root,
                finished: AtomicBool::new(false),
                state: RwLock::new(SpanState {
                    name,
                    service,
                    resource,
                    span_type,
                    start,
                    duration: 0,
                    meta: HashMap::new(),
                    metrics: HashMap::new(),
                    error: 0,
                }),
                buffer,
            }),
        }
    }

    /// A span that records locally but is never exported. Handed out before
    /// global init, after shutdown, and by the disabled tracer.
    pub(crate) fn noop(name: impl Into<String>) -> Self {
        Span::start(
            SpanContext::disabled(),
            0,
            true,
            name.into(),
            String::new(),
            String::new(),
            String::new(),
            now_nanos(),
            None,
        )
    }

    /// The span's context; valid before and after `finish`.
    pub fn context(&self) -> SpanContext {
        self.inner.context.clone()
    }

    /// Identifier of the direct parent, 0 for a root span.
    pub fn parent_id(&self) -> u64 {
        self.inner.parent_id
    }

    /// Sets a tag on the span. String values land in meta, numeric values in
    /// metrics, and the reserved keys in [`tags`] redirect to span fields,
    /// the error flag or the sampling priority. No-op once finished.
    pub fn set_tag(&self, key: &str, value: impl Into<TagValue>) {
        if self.inner.finished.load(Ordering::Acquire) {
            return;
        }
        let value = value.into();
        let Ok(mut state) = self.inner.state.write() else {
            return;
        };
        if key == tags::ERROR {
            Self::set_tag_error(&mut state, value);
            return;
        }
        match value {
            TagValue::Str(v) => Self::set_tag_str(&mut state, key, v),
            TagValue::Int(v) => self.set_tag_numeric(&mut state, key, v as f64),
            TagValue::Float(v) => self.set_tag_numeric(&mut state, key, v),
            TagValue::Bool(v) => {
                state.meta.insert(key.to_owned(), v.to_string());
            }
            TagValue::Error { message, .. } | TagValue::Other(message) => {
                state.meta.insert(key.to_owned(), message);
            }
        }
    }

    fn set_tag_error(state: &mut SpanState, value: TagValue) {
        match value {
            // Boolean semantics: true marks, false deliberately un-marks even
            // a previously set flag. Recorded error meta survives un-marking.
            TagValue::Bool(false) => state.error = 0,
            TagValue::Bool(true) => state.error = 1,
            TagValue::Error { message, kind } => {
                state.error = 1;
                state.meta.insert(tags::ERROR_MSG.to_owned(), message);
                state.meta.insert(tags::ERROR_TYPE.to_owned(), kind.to_owned());
                state.meta.insert(
                    tags::ERROR_STACK.to_owned(),
                    std::backtrace::Backtrace::force_capture().to_string(),
                );
            }
            // Any other value under the error key counts as an error mark.
            _ => state.error = 1,
        }
    }

    fn set_tag_str(state: &mut SpanState, key: &str, value: String) {
        match key {
            tags::SERVICE_NAME => state.service = value,
            tags::RESOURCE_NAME => state.resource = value,
            tags::SPAN_TYPE => state.span_type = value,
            _ => {
                state.meta.insert(key.to_owned(), value);
            }
        }
    }

    fn set_tag_numeric(&self, state: &mut SpanState, key: &str, value: f64) {
        if key == tags::SAMPLING_PRIORITY {
            state
                .metrics
                .insert(tags::SAMPLING_PRIORITY_KEY.to_owned(), value);
            self.inner.context.set_sampling_priority(value as i32);
        } else {
            state.metrics.insert(key.to_owned(), value);
        }
    }

    /// Replaces the operation name. No-op once finished.
    pub fn set_operation_name(&self, name: impl Into<String>) {
        if self.inner.finished.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut state) = self.inner.state.write() {
            state.name = name.into();
        }
    }

    /// Looks up a baggage item on the owning context.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.inner.context.baggage_item(key)
    }

    /// Sets a baggage item on the owning context; propagated to descendant
    /// spans and across process boundaries.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.context.set_baggage_item(key, value);
    }

    /// Finishes the span at the current time.
    pub fn finish(&self) {
        self.finish_with(FinishOptions::default());
    }

    /// Finishes the span, optionally at an explicit time and/or recording a
    /// final error. Idempotent: the first call wins, later calls change
    /// nothing and never re-submit the span.
    pub fn finish_with(&self, options: FinishOptions) {
        if let Some(error) = options.error {
            self.set_tag(tags::ERROR, error);
        }
        let finish_nanos = options
            .finish_time
            .map(unix_nanos)
            .unwrap_or_else(now_nanos);
        self.finish_at(finish_nanos);
    }

    fn finish_at(&self, finish_nanos: i64) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let sampled = self.inner.context.is_sampled();
        let mut data = None;
        if let Ok(mut state) = self.inner.state.write() {
            state.duration = finish_nanos.saturating_sub(state.start);
            if sampled && self.inner.buffer.is_some() {
                // Sampled finish bookkeeping: the local root carries the
                // trace's priority so the agent sees the decision.
                if self.inner.local_root {
                    if let Some(priority) = self.inner.context.sampling_priority() {
                        state
                            .metrics
                            .insert(tags::SAMPLING_PRIORITY_KEY.to_owned(), priority as f64);
                    }
                }
                data = Some(SpanData {
                    name: state.name.clone(),
                    service: state.service.clone(),
                    resource: state.resource.clone(),
                    span_type: state.span_type.clone(),
                    start: state.start,
                    duration: state.duration,
                    meta: state.meta.clone(),
                    metrics: state.metrics.clone(),
                    span_id: self.inner.context.span_id(),
                    trace_id: self.inner.context.trace_id(),
                    parent_id: self.inner.parent_id,
                    error: state.error,
                    local_root: self.inner.local_root,
                });
            }
        }
        // The span lock is released before touching the buffer, so the span
        // lock and the buffer index lock are never held together.
        if let Some(buffer) = &self.inner.buffer {
            buffer.note_finished();
            if let Some(data) = data {
                buffer.push(data);
            }
        }
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// The operation name.
    pub fn operation_name(&self) -> String {
        self.read(|s| s.name.clone())
    }

    /// The service name.
    pub fn service(&self) -> String {
        self.read(|s| s.service.clone())
    }

    /// The resource name.
    pub fn resource(&self) -> String {
        self.read(|s| s.resource.clone())
    }

    /// The span type.
    pub fn span_type(&self) -> String {
        self.read(|s| s.span_type.clone())
    }

    /// Start time in nanoseconds since the Unix epoch.
    pub fn start_nanos(&self) -> i64 {
        self.read(|s| s.start)
    }

    /// Duration in nanoseconds; 0 until finished.
    pub fn duration(&self) -> i64 {
        self.read(|s| s.duration)
    }

    /// The error flag; 0 when no error is recorded.
    pub fn error(&self) -> i32 {
        self.read(|s| s.error)
    }

    /// Reads a string tag from the meta mapping.
    pub fn tag(&self, key: &str) -> Option<String> {
        self.read(|s| s.meta.get(key).cloned())
    }

    /// Reads a numeric tag from the metrics mapping.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.read(|s| s.metrics.get(key).cloned())
    }

    fn read<T: Default>(&self, f: impl FnOnce(&SpanState) -> T) -> T {
        self.inner.state.read().map(|s| f(&s)).unwrap_or_default()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Span");
        dbg.field("trace_id", &self.inner.context.trace_id())
            .field("span_id", &self.inner.context.span_id())
            .field("parent_id", &self.inner.parent_id)
            .field("finished", &self.is_finished());
        if let Ok(state) = self.inner.state.read() {
            dbg.field("name", &state.name)
                .field("service", &state.service)
                .field("resource", &state.resource)
                .field("type", &state.span_type)
                .field("start", &state.start)
                .field("duration", &state.duration)
                .field("error", &state.error)
                .field("meta", &state.meta)
                .field("metrics", &state.metrics);
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_span() -> Span {
        Span::start(
            crate::context::SpanContext::local_root(1, true, 1),
            0,
            true,
            "op".into(),
            "svc".into(),
            "res".into(),
            String::new(),
            now_nanos(),
            None,
        )
    }

    #[test]
    fn reserved_string_keys_redirect_to_fields() {
        let span = test_span();
        span.set_tag(tags::SERVICE_NAME, "billing");
        span.set_tag(tags::RESOURCE_NAME, "SELECT 1");
        span.set_tag(tags::SPAN_TYPE, "db");
        span.set_tag("peer.hostname", "localhost");

        assert_eq!(span.service(), "billing");
        assert_eq!(span.resource(), "SELECT 1");
        assert_eq!(span.span_type(), "db");
        assert_eq!(span.tag("peer.hostname").as_deref(), Some("localhost"));
        assert_eq!(span.tag(tags::SERVICE_NAME), None);
    }

    #[test]
    fn numeric_tags_become_metrics() {
        let span = test_span();
        span.set_tag("retries", 3);
        span.set_tag("elapsed_ratio", 0.5);
        assert_eq!(span.metric("retries"), Some(3.0));
        assert_eq!(span.metric("elapsed_ratio"), Some(0.5));
    }

    #[test]
    fn priority_tag_updates_context() {
        let span = test_span();
        span.set_tag(tags::SAMPLING_PRIORITY, -1);
        assert!(!span.context().is_sampled());
        assert_eq!(span.context().sampling_priority(), Some(-1));
        assert_eq!(span.metric("_sampling_priority_v1"), Some(-1.0));

        span.set_tag(tags::SAMPLING_PRIORITY, 2);
        assert!(span.context().is_sampled());
        assert_eq!(span.context().sampling_priority(), Some(2));
    }

    #[test]
    fn error_value_records_meta_and_unmark_keeps_it() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let span = test_span();
        span.set_tag(tags::ERROR, TagValue::error(&err));

        assert_eq!(span.error(), 1);
        assert_eq!(span.tag(tags::ERROR_MSG).as_deref(), Some("boom"));
        assert!(span.tag(tags::ERROR_TYPE).is_some());
        assert!(span.tag(tags::ERROR_STACK).is_some());

        span.set_tag(tags::ERROR, false);
        assert_eq!(span.error(), 0);
        // The un-mark clears the flag but not the recorded message.
        assert_eq!(span.tag(tags::ERROR_MSG).as_deref(), Some("boom"));
    }

    #[test]
    fn non_error_value_under_error_key_marks() {
        let span = test_span();
        span.set_tag(tags::ERROR, "something went wrong");
        assert_eq!(span.error(), 1);
    }

    #[test]
    fn display_fallback_stringifies() {
        let span = test_span();
        span.set_tag("peer.ip", TagValue::display(std::net::Ipv4Addr::LOCALHOST));
        assert_eq!(span.tag("peer.ip").as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn finish_is_idempotent() {
        let span = test_span();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let span = Span::start(
            span.context(),
            0,
            true,
            "op".into(),
            "svc".into(),
            "res".into(),
            String::new(),
            unix_nanos(start),
            None,
        );

        assert_eq!(span.start_nanos(), 1_000_000_000_000);

        span.finish_with(FinishOptions::default().with_finish_time(start + Duration::from_millis(10)));
        assert_eq!(span.duration(), 10_000_000);

        span.finish_with(FinishOptions::default().with_finish_time(start + Duration::from_secs(5)));
        assert_eq!(span.duration(), 10_000_000);
    }

    #[test]
    fn tagging_after_finish_is_a_noop() {
        let span = test_span();
        span.finish();
        span.set_tag("late", "value");
        span.set_operation_name("renamed");
        assert_eq!(span.tag("late"), None);
        assert_eq!(span.operation_name(), "op");
    }

    #[test]
    fn finish_error_option_applies_before_freezing() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "late failure");
        let span = test_span();
        span.finish_with(FinishOptions::default().with_error(&err));
        assert_eq!(span.error(), 1);
        assert_eq!(span.tag(tags::ERROR_MSG).as_deref(), Some("late failure"));
    }

    #[test]
    fn noop_span_is_safe() {
        let span = Span::noop("ignored");
        span.set_tag("key", "value");
        span.finish();
        assert!(span.is_finished());
        assert_eq!(span.context().trace_id(), 0);
    }
}
