use std::time::Duration;

use crate::propagation::PropagationError;
use crate::transport::TransportError;

/// Errors surfaced by the tracing pipeline.
///
/// None of these are ever raised into instrumented request paths; they are
/// returned from explicit lifecycle calls (`flush`, `stop`, `extract`) or
/// logged as health signals by the background writer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Carrier data could not be decoded into a span context.
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    /// The request to the collector agent failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Message pack encoding of a trace payload failed.
    #[error("message pack encoding failed")]
    MessagePack,
    /// A forced flush did not complete within the timeout.
    #[error("flush timed out after {0:?}")]
    FlushTimedOut(Duration),
    /// Shutdown did not complete within the timeout; the writer thread is
    /// abandoned rather than awaited.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimedOut(Duration),
    /// The tracer has already been stopped.
    #[error("tracer already shut down")]
    AlreadyShutdown,
}

impl From<rmp::encode::ValueWriteError> for Error {
    fn from(_: rmp::encode::ValueWriteError) -> Self {
        Self::MessagePack
    }
}
