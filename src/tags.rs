//! Reserved tag keys understood by [`Span::set_tag`](crate::Span::set_tag).
//!
//! Most keys written through `set_tag` land in the span's meta (string) or
//! metrics (numeric) mapping verbatim. The keys in this module are special
//! cased and redirected to dedicated span fields or to the sampling machinery.

/// Redirects a string value to the span's service field.
pub const SERVICE_NAME: &str = "service.name";

/// Redirects a string value to the span's resource field.
pub const RESOURCE_NAME: &str = "resource.name";

/// Redirects a string value to the span's type field.
pub const SPAN_TYPE: &str = "span.type";

/// Redirects a numeric value to the trace's sampling priority. Setting it
/// overrides the sampler's decision for the whole trace.
pub const SAMPLING_PRIORITY: &str = "sampling.priority";

/// Marks or un-marks the span as errored. Accepts a boolean, or an error
/// value which additionally records message, type and stack meta.
pub const ERROR: &str = "error";

/// Meta key holding the recorded error message.
pub const ERROR_MSG: &str = "error.msg";

/// Meta key holding the recorded error type name.
pub const ERROR_TYPE: &str = "error.type";

/// Meta key holding the backtrace captured when an error value was recorded.
pub const ERROR_STACK: &str = "error.stack";

/// Metrics key under which the sampling priority travels to the agent.
pub(crate) const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";
