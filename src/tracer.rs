use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::buffer::{BufferConfig, TraceBuffer};
use crate::context::SpanContext;
use crate::error::Error;
use crate::id::random_id;
use crate::propagation::{Extractor, Injector, PropagationError, TextMapPropagator};
use crate::sampler::{Sampler, ShouldSample};
use crate::span::{now_nanos, unix_nanos, Span, StartSpanOptions};
use crate::stats::{Health, HealthStats};
use crate::transport::{HttpTransport, Transport};
use crate::wire::ApiVersion;
use crate::writer::{Writer, WriterConfig};

/// Tracer configuration with production defaults. Built through
/// [`TracerBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Default service name stamped on spans without an explicit one.
    pub service: String,
    /// Base URL of the local collector agent.
    pub agent_endpoint: String,
    /// Ingestion API version used on the wire.
    pub api_version: ApiVersion,
    /// How often the writer flushes accumulated batches.
    pub flush_interval: Duration,
    /// Span count that triggers an early batch flush.
    pub max_batch_spans: usize,
    /// Span count above which the writer sheds its oldest traces.
    pub max_buffered_spans: usize,
    /// Capacity of the queue between span finish and the writer thread.
    pub max_queued_traces: usize,
    /// Spans per trace before the buffer flushes the trace partial.
    pub max_spans_per_trace: usize,
    /// Age of an open trace before the buffer flushes it partial.
    pub max_trace_age: Duration,
    /// Timeout for one HTTP request to the agent.
    pub request_timeout: Duration,
    /// How long `flush` waits for the writer's acknowledgement.
    pub flush_timeout: Duration,
    /// How long `stop` waits before abandoning the writer thread.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service: "unnamed-service".to_owned(),
            agent_endpoint: "http://127.0.0.1:8126".to_owned(),
            api_version: ApiVersion::default(),
            flush_interval: Duration::from_secs(2),
            max_batch_spans: 1000,
            max_buffered_spans: 10_000,
            max_queued_traces: 1000,
            max_spans_per_trace: 1000,
            max_trace_age: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder for a [`Tracer`].
#[derive(Debug, Default)]
pub struct TracerBuilder {
    config: Config,
    sampler: Option<Box<dyn ShouldSample>>,
    transport: Option<Box<dyn Transport>>,
}

impl TracerBuilder {
    /// Sets the default service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    /// Sets the collector agent base URL.
    pub fn with_agent_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.agent_endpoint = endpoint.into();
        self
    }

    /// Selects the ingestion API version.
    pub fn with_api_version(mut self, version: ApiVersion) -> Self {
        self.config.api_version = version;
        self
    }

    /// Sets the writer flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Sets the span count that triggers an early batch flush.
    pub fn with_max_batch_spans(mut self, spans: usize) -> Self {
        self.config.max_batch_spans = spans;
        self
    }

    /// Sets the sampler deciding which traces are kept.
    pub fn with_sampler(mut self, sampler: impl ShouldSample + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Replaces the HTTP transport, e.g. with a recording transport in tests.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Applies a full configuration at once.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Builds the tracer, spawning its writer thread.
    pub fn build(self) -> Result<Tracer, Error> {
        let config = self.config;
        let sampler = self
            .sampler
            .unwrap_or_else(|| Box::new(Sampler::AlwaysOn));
        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(
                &config.agent_endpoint,
                config.api_version,
                config.request_timeout,
            )?),
        };

        let stats = Arc::new(HealthStats::default());
        let (sender, receiver) = mpsc::sync_channel(config.max_queued_traces);
        let buffer = Arc::new(TraceBuffer::new(
            sender.clone(),
            BufferConfig {
                max_spans_per_trace: config.max_spans_per_trace,
                max_trace_age: config.max_trace_age,
            },
            Arc::clone(&stats),
        ));
        let writer = Writer::spawn(
            WriterConfig {
                flush_interval: config.flush_interval,
                max_batch_spans: config.max_batch_spans,
                max_buffered_spans: config.max_buffered_spans,
                backoff_base: Duration::from_secs(1),
                backoff_max: Duration::from_secs(30),
                api_version: config.api_version,
            },
            transport,
            receiver,
            sender,
            Arc::clone(&buffer),
            Arc::clone(&stats),
            config.flush_timeout,
            config.shutdown_timeout,
        );

        Ok(Tracer {
            inner: Arc::new(TracerInner {
                config,
                sampler,
                propagator: TextMapPropagator::new(),
                buffer,
                writer,
                stats,
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Builds the tracer and installs it as the process-wide default.
    pub fn install_global(self) -> Result<Tracer, Error> {
        let tracer = self.build()?;
        crate::global::set_tracer(tracer.clone());
        Ok(tracer)
    }
}

#[derive(Debug)]
struct TracerInner {
    config: Config,
    sampler: Box<dyn ShouldSample>,
    propagator: TextMapPropagator,
    buffer: Arc<TraceBuffer>,
    writer: Writer,
    stats: Arc<HealthStats>,
    is_shutdown: AtomicBool,
}

/// The tracing pipeline's entry point: creates spans, propagates contexts and
/// drives the export lifecycle.
///
/// Cloning is cheap; clones share one pipeline. All methods are safe to call
/// from any thread.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// Starts building a tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// Starts a span. Without a parent in `options` this opens a new trace,
    /// consulting the sampler once; with one, the span joins the parent's
    /// trace and inherits its sampling decision and baggage.
    ///
    /// After `stop` this returns an inert span so instrumented code keeps
    /// working during shutdown.
    pub fn start_span(&self, name: impl Into<String>, options: StartSpanOptions) -> Span {
        if self.inner.is_shutdown.load(Ordering::Acquire) {
            return Span::noop(name);
        }
        let StartSpanOptions {
            service,
            resource,
            span_type,
            start_time,
            parent,
            tags,
        } = options;

        let span_id = random_id();
        let (context, parent_id, local_root) = match parent {
            Some(parent) => {
                let local_root = parent.is_remote();
                (parent.child(span_id), parent.span_id(), local_root)
            }
            None => {
                // New trace: one id serves as both trace and span id, and the
                // sampler is consulted exactly once.
                let verdict = self.inner.sampler.should_sample(span_id);
                (
                    SpanContext::local_root(span_id, verdict.sampled, verdict.priority),
                    0,
                    true,
                )
            }
        };

        let name = name.into();
        let resource = resource.unwrap_or_else(|| name.clone());
        let service = service.unwrap_or_else(|| self.inner.config.service.clone());
        let start = start_time.map(unix_nanos).unwrap_or_else(now_nanos);

        let span = Span::start(
            context,
            parent_id,
            local_root,
            name,
            service,
            resource,
            span_type.unwrap_or_default(),
            start,
            Some(Arc::clone(&self.inner.buffer)),
        );
        for (key, value) in tags {
            span.set_tag(&key, value);
        }
        self.inner.stats.spans_started.fetch_add(1, Ordering::Relaxed);
        span
    }

    /// Writes `context` into a carrier for a downstream peer.
    pub fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        self.inner.propagator.inject(context, injector);
    }

    /// Reconstructs the caller's span context from a carrier. On error the
    /// caller starts a fresh root trace instead.
    pub fn extract(&self, extractor: &dyn Extractor) -> Result<SpanContext, PropagationError> {
        self.inner.propagator.extract(extractor)
    }

    /// Forces every buffered trace through one delivery attempt, blocking
    /// until the writer acknowledges or the flush timeout elapses.
    pub fn flush(&self) -> Result<(), Error> {
        if self.inner.is_shutdown.load(Ordering::Acquire) {
            return Err(Error::AlreadyShutdown);
        }
        self.inner.writer.force_flush()
    }

    /// Stops the tracer: one final flush, then the writer thread exits.
    /// Idempotent; spans started afterwards are inert.
    pub fn stop(&self) -> Result<(), Error> {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.inner.writer.shutdown();
        let health = self.inner.stats.snapshot();
        if health.traces_dropped > 0 || health.batches_dropped > 0 {
            tracing::info!(
                traces_dropped = health.traces_dropped,
                spans_dropped = health.spans_dropped,
                batches_dropped = health.batches_dropped,
                "tracer stopped with dropped telemetry"
            );
        }
        result
    }

    /// Point-in-time snapshot of the pipeline's health counters.
    pub fn health(&self) -> Health {
        self.inner.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::priority;
    use crate::tags;
    use crate::transport::TransportError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct NullTransport {
        calls: Mutex<usize>,
    }

    impl Transport for NullTransport {
        fn send(&self, _payload: &[u8], _trace_count: usize) -> Result<(), TransportError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn test_tracer() -> Tracer {
        Tracer::builder()
            .with_service("checkout")
            .with_transport(NullTransport::default())
            .build()
            .unwrap()
    }

    #[test]
    fn root_span_uses_one_id_for_trace_and_span() {
        let tracer = test_tracer();
        let span = tracer.start_span("web.request", StartSpanOptions::default());
        let context = span.context();
        assert_ne!(context.trace_id(), 0);
        assert_eq!(context.trace_id(), context.span_id());
        assert_eq!(span.parent_id(), 0);
        assert_eq!(context.sampling_priority(), Some(priority::AUTO_KEEP));
        tracer.stop().unwrap();
    }

    #[test]
    fn child_joins_parent_trace() {
        let tracer = test_tracer();
        let root = tracer.start_span("web.request", StartSpanOptions::default());
        let child = tracer.start_span(
            "db.query",
            StartSpanOptions::default().child_of(root.context()),
        );

        let root_cx = root.context();
        let child_cx = child.context();
        assert_eq!(child_cx.trace_id(), root_cx.trace_id());
        assert_ne!(child_cx.span_id(), root_cx.span_id());
        assert_eq!(child.parent_id(), root_cx.span_id());
        tracer.stop().unwrap();
    }

    #[test]
    fn defaults_and_options_fill_span_fields() {
        let tracer = test_tracer();
        let plain = tracer.start_span("db.query", StartSpanOptions::default());
        assert_eq!(plain.service(), "checkout");
        assert_eq!(plain.resource(), "db.query");

        let custom = tracer.start_span(
            "db.query",
            StartSpanOptions::default()
                .with_service("postgres")
                .with_resource("SELECT 1")
                .with_span_type("db")
                .with_tag("rows", 7)
                .with_tag(tags::ERROR, true),
        );
        assert_eq!(custom.service(), "postgres");
        assert_eq!(custom.resource(), "SELECT 1");
        assert_eq!(custom.span_type(), "db");
        assert_eq!(custom.metric("rows"), Some(7.0));
        assert_eq!(custom.error(), 1);
        tracer.stop().unwrap();
    }

    #[test]
    fn extracted_parent_makes_the_child_a_local_root() {
        let tracer = test_tracer();
        let carrier: HashMap<String, String> = [
            ("x-trace-id".to_owned(), "1234".to_owned()),
            ("x-parent-id".to_owned(), "12".to_owned()),
            ("x-sampling-priority".to_owned(), "1".to_owned()),
        ]
        .into_iter()
        .collect();

        let remote = tracer.extract(&carrier).unwrap();
        let span = tracer.start_span(
            "web.request",
            StartSpanOptions::default().child_of(remote),
        );
        assert_eq!(span.context().trace_id(), 1234);
        assert_eq!(span.parent_id(), 12);
        tracer.stop().unwrap();
    }

    #[test]
    fn stopped_tracer_hands_out_inert_spans() {
        let tracer = test_tracer();
        tracer.stop().unwrap();
        tracer.stop().unwrap();

        let span = tracer.start_span("late", StartSpanOptions::default());
        span.finish();
        assert_eq!(span.context().trace_id(), 0);
        assert!(matches!(tracer.flush(), Err(Error::AlreadyShutdown)));
        assert_eq!(tracer.health().spans_started, 0);
    }

    #[test]
    fn health_counts_span_lifecycle() {
        let tracer = test_tracer();
        let span = tracer.start_span("web.request", StartSpanOptions::default());
        assert_eq!(tracer.health().spans_started, 1);
        span.finish();
        assert_eq!(tracer.health().spans_finished, 1);
        assert_eq!(tracer.health().traces_flushed, 1);
        tracer.stop().unwrap();
    }
}
