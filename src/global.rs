//! Process-wide default tracer.
//!
//! Libraries instrument against this module so applications decide, at
//! startup, where spans go. Before [`set_tracer`] runs (and after
//! [`shutdown_tracer`]) every helper degrades to inert spans instead of
//! failing.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::Error;
use crate::span::{Span, StartSpanOptions};
use crate::tracer::Tracer;

static GLOBAL_TRACER: Lazy<RwLock<Option<Tracer>>> = Lazy::new(|| RwLock::new(None));

/// Installs `tracer` as the process-wide default, replacing any previous one.
pub fn set_tracer(tracer: Tracer) {
    if let Ok(mut slot) = GLOBAL_TRACER.write() {
        *slot = Some(tracer);
    }
}

/// The installed default tracer, if any.
pub fn tracer() -> Option<Tracer> {
    GLOBAL_TRACER.read().ok().and_then(|slot| slot.clone())
}

/// Starts a span on the default tracer; an inert span when none is installed.
pub fn start_span(name: impl Into<String>, options: StartSpanOptions) -> Span {
    match tracer() {
        Some(tracer) => tracer.start_span(name, options),
        None => Span::noop(name),
    }
}

/// Uninstalls and stops the default tracer. Returns `Ok` when none was
/// installed.
pub fn shutdown_tracer() -> Result<(), Error> {
    let taken = GLOBAL_TRACER
        .write()
        .ok()
        .and_then(|mut slot| slot.take());
    match taken {
        Some(tracer) => tracer.stop(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global slot is shared process state, so this is one test to keep
    // ordering deterministic under the parallel test runner.
    #[test]
    fn lifecycle_around_the_global_slot() {
        assert!(shutdown_tracer().is_ok());

        let span = start_span("early", StartSpanOptions::default());
        span.finish();
        assert_eq!(span.context().trace_id(), 0);
    }
}
