//! Cross-process context propagation.
//!
//! A span context travels between processes inside a flat string-to-string
//! carrier (typically transport headers) under a fixed key scheme:
//!
//! * `x-trace-id`: trace identifier, decimal u64
//! * `x-parent-id`: span identifier of the caller, decimal u64
//! * `x-sampling-priority`: decimal i32, optional
//! * `x-baggage-<key>`: one carrier key per baggage item
//!
//! Identifiers are always decimal; both sides of a call must agree on that,
//! so the encoding is part of the contract and covered by round-trip tests.
//!
//! Carrier keys are case-insensitive, matching HTTP header semantics: the
//! `HashMap` carrier impls lowercase keys on both write and lookup, so a
//! baggage item set under `Account` travels (and is read back) as
//! `x-baggage-account`. Baggage values are untouched.

use std::collections::HashMap;

use crate::context::SpanContext;

/// Carrier key holding the trace identifier.
pub const TRACE_ID_KEY: &str = "x-trace-id";
/// Carrier key holding the parent span identifier.
pub const PARENT_ID_KEY: &str = "x-parent-id";
/// Carrier key holding the sampling priority.
pub const SAMPLING_PRIORITY_KEY: &str = "x-sampling-priority";
/// Prefix under which baggage items travel, one carrier key per item.
pub const BAGGAGE_PREFIX: &str = "x-baggage-";

/// Failure to decode carrier data into a span context. The caller recovers
/// by starting a new root trace.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PropagationError {
    /// A required carrier key is absent.
    #[error("carrier is missing the {0} key")]
    Missing(&'static str),
    /// A carrier value could not be parsed.
    #[error("carrier value for {0} is malformed")]
    Malformed(&'static str),
}

/// Adds propagation fields to an underlying carrier such as a header map.
pub trait Injector {
    /// Sets a key/value pair on the carrier.
    fn set(&mut self, key: &str, value: String);
}

/// Reads propagation fields from an underlying carrier such as a header map.
pub trait Extractor {
    /// Gets the value for a key, if present.
    fn get(&self, key: &str) -> Option<&str>;

    /// All keys present in the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect()
    }
}

/// Encodes span contexts into and out of text carriers using the fixed key
/// scheme documented at the module level.
#[derive(Clone, Debug, Default)]
pub struct TextMapPropagator {
    _private: (),
}

impl TextMapPropagator {
    /// Creates a propagator.
    pub fn new() -> Self {
        TextMapPropagator::default()
    }

    /// Writes `context` into the carrier. Contexts without an assigned trace
    /// id (no-op spans) inject nothing.
    pub fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        if context.trace_id() == 0 {
            return;
        }
        injector.set(TRACE_ID_KEY, context.trace_id().to_string());
        injector.set(PARENT_ID_KEY, context.span_id().to_string());
        let priority = context.sampling_priority().unwrap_or(i32::from(context.is_sampled()));
        injector.set(SAMPLING_PRIORITY_KEY, priority.to_string());
        for (key, value) in context.baggage_snapshot() {
            injector.set(&format!("{BAGGAGE_PREFIX}{key}"), value);
        }
    }

    /// Reconstructs a span context from the carrier. Trace and parent ids are
    /// required and must be nonzero decimal u64; the priority is optional but
    /// must parse when present.
    pub fn extract(&self, extractor: &dyn Extractor) -> Result<SpanContext, PropagationError> {
        let trace_id = extract_id(extractor, TRACE_ID_KEY)?;
        let span_id = extract_id(extractor, PARENT_ID_KEY)?;
        let priority = match extractor.get(SAMPLING_PRIORITY_KEY) {
            None => None,
            Some(raw) => Some(
                raw.parse::<i32>()
                    .map_err(|_| PropagationError::Malformed(SAMPLING_PRIORITY_KEY))?,
            ),
        };

        let mut baggage = HashMap::new();
        for key in extractor.keys() {
            if let Some(item) = key.strip_prefix(BAGGAGE_PREFIX) {
                if let Some(value) = extractor.get(key) {
                    baggage.insert(item.to_owned(), value.to_owned());
                }
            }
        }

        Ok(SpanContext::remote(trace_id, span_id, priority, baggage))
    }
}

fn extract_id(extractor: &dyn Extractor, key: &'static str) -> Result<u64, PropagationError> {
    let raw = extractor.get(key).ok_or(PropagationError::Missing(key))?;
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(PropagationError::Malformed(key)),
        Ok(id) => Ok(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_requires_well_formed_ids() {
        let cases: Vec<(Vec<(&str, &str)>, PropagationError)> = vec![
            (vec![], PropagationError::Missing(TRACE_ID_KEY)),
            (
                vec![(TRACE_ID_KEY, "garbage")],
                PropagationError::Malformed(TRACE_ID_KEY),
            ),
            (
                vec![(TRACE_ID_KEY, "0"), (PARENT_ID_KEY, "12")],
                PropagationError::Malformed(TRACE_ID_KEY),
            ),
            (
                vec![(TRACE_ID_KEY, "1234")],
                PropagationError::Missing(PARENT_ID_KEY),
            ),
            (
                vec![(TRACE_ID_KEY, "1234"), (PARENT_ID_KEY, "-1")],
                PropagationError::Malformed(PARENT_ID_KEY),
            ),
            (
                vec![
                    (TRACE_ID_KEY, "1234"),
                    (PARENT_ID_KEY, "12"),
                    (SAMPLING_PRIORITY_KEY, "high"),
                ],
                PropagationError::Malformed(SAMPLING_PRIORITY_KEY),
            ),
        ];

        let propagator = TextMapPropagator::new();
        for (entries, expected) in cases {
            let map = carrier(&entries);
            assert_eq!(propagator.extract(&map).unwrap_err(), expected);
        }
    }

    #[test]
    fn extract_reads_ids_priority_and_baggage() {
        let map = carrier(&[
            (TRACE_ID_KEY, "1234"),
            (PARENT_ID_KEY, "12"),
            (SAMPLING_PRIORITY_KEY, "2"),
            ("x-baggage-account", "42"),
            ("unrelated", "ignored"),
        ]);
        let context = TextMapPropagator::new().extract(&map).unwrap();

        assert_eq!(context.trace_id(), 1234);
        assert_eq!(context.span_id(), 12);
        assert_eq!(context.sampling_priority(), Some(2));
        assert!(context.is_sampled());
        assert_eq!(context.baggage_item("account").as_deref(), Some("42"));
        assert_eq!(context.baggage_item("unrelated"), None);
    }

    #[test]
    fn missing_priority_leaves_decision_open() {
        let map = carrier(&[(TRACE_ID_KEY, "1234"), (PARENT_ID_KEY, "12")]);
        let context = TextMapPropagator::new().extract(&map).unwrap();
        assert_eq!(context.sampling_priority(), None);
        assert!(context.is_sampled());
    }

    #[test]
    fn inject_writes_fixed_keys() {
        let context = SpanContext::local_root(1234, true, 1);
        context.set_baggage_item("account", "42");

        let mut map: HashMap<String, String> = HashMap::new();
        TextMapPropagator::new().inject(&context, &mut map);

        assert_eq!(map.get(TRACE_ID_KEY).map(String::as_str), Some("1234"));
        assert_eq!(map.get(PARENT_ID_KEY).map(String::as_str), Some("1234"));
        assert_eq!(map.get(SAMPLING_PRIORITY_KEY).map(String::as_str), Some("1"));
        assert_eq!(
            map.get("x-baggage-account").map(String::as_str),
            Some("42")
        );
    }

    #[test]
    fn inject_skips_unassigned_contexts() {
        let mut map: HashMap<String, String> = HashMap::new();
        TextMapPropagator::new().inject(&SpanContext::disabled(), &mut map);
        assert!(map.is_empty());
    }

    #[test]
    fn carrier_keys_are_case_insensitive() {
        let context = SpanContext::local_root(1234, true, 1);
        context.set_baggage_item("Account", "42");

        let mut map: HashMap<String, String> = HashMap::new();
        let propagator = TextMapPropagator::new();
        propagator.inject(&context, &mut map);
        assert_eq!(map.get("x-baggage-account").map(String::as_str), Some("42"));

        let extracted = propagator.extract(&map).unwrap();
        assert_eq!(extracted.baggage_item("account").as_deref(), Some("42"));
    }

    #[test]
    fn round_trip_preserves_identity() {
        let context = SpanContext::local_root(987_654_321, false, 0);
        context.set_baggage_item("tenant", "acme");
        context.set_baggage_item("region", "eu-west-1");

        let mut map: HashMap<String, String> = HashMap::new();
        let propagator = TextMapPropagator::new();
        propagator.inject(&context, &mut map);
        let extracted = propagator.extract(&map).unwrap();

        assert_eq!(extracted.trace_id(), context.trace_id());
        assert_eq!(extracted.span_id(), context.span_id());
        assert_eq!(extracted.sampling_priority(), Some(0));
        assert!(!extracted.is_sampled());
        assert_eq!(extracted.baggage_item("tenant").as_deref(), Some("acme"));
        assert_eq!(
            extracted.baggage_item("region").as_deref(),
            Some("eu-west-1")
        );
    }
}
