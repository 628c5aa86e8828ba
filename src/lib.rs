//! Client-side distributed tracing core.
//!
//! `tracekit` instruments an application with [`Span`]s, groups finished
//! spans into traces, and ships them as MessagePack batches to a local
//! collector agent from a background writer thread. Sampling is decided once
//! per trace, and span contexts travel across process boundaries through
//! pluggable text carriers.
//!
//! ```no_run
//! use tracekit::{StartSpanOptions, Tracer};
//!
//! fn main() -> Result<(), tracekit::Error> {
//!     let tracer = Tracer::builder()
//!         .with_service("checkout")
//!         .install_global()?;
//!
//!     let span = tracer.start_span(
//!         "web.request",
//!         StartSpanOptions::default().with_resource("GET /users"),
//!     );
//!     let child = tracer.start_span(
//!         "db.query",
//!         StartSpanOptions::default().child_of(span.context()),
//!     );
//!     child.set_tag("rows", 42);
//!     child.finish();
//!     span.finish();
//!
//!     tracer.stop()
//! }
//! ```
//!
//! Telemetry must never take an application down: span mutation is internally
//! synchronized, export happens off the request path, and under pressure the
//! pipeline drops traces (counted in [`Health`]) instead of blocking.

mod buffer;
mod context;
mod error;
pub mod global;
mod id;
pub mod propagation;
pub mod sampler;
mod span;
mod stats;
pub mod tags;
mod tracer;
mod transport;
mod wire;
mod writer;

pub use context::SpanContext;
pub use error::Error;
pub use propagation::{Extractor, Injector, PropagationError, TextMapPropagator};
pub use sampler::{Sampler, SamplingResult, ShouldSample};
pub use span::{FinishOptions, Span, SpanData, StartSpanOptions, TagValue};
pub use stats::Health;
pub use tracer::{Config, Tracer, TracerBuilder};
pub use transport::{HttpTransport, Transport, TransportError};
pub use wire::ApiVersion;
