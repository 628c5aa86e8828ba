//! Agent wire encodings.
//!
//! Batches are serialized as MessagePack and posted to the local collector
//! agent. Two ingestion formats are supported: v0.3 encodes each span as a
//! self-describing field map, v0.5 deduplicates strings through an interning
//! table and is the default.

mod intern;
mod v03;
mod v05;

use crate::error::Error;
use crate::span::SpanData;

/// Version of the agent trace ingestion API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiVersion {
    /// Map-per-span encoding, `/v0.3/traces`.
    V03,
    /// String-interned encoding, `/v0.5/traces`.
    #[default]
    V05,
}

impl ApiVersion {
    pub(crate) fn path(self) -> &'static str {
        match self {
            ApiVersion::V03 => "/v0.3/traces",
            ApiVersion::V05 => "/v0.5/traces",
        }
    }

    pub(crate) fn content_type(self) -> &'static str {
        "application/msgpack"
    }

    /// Serializes a batch of traces, each an ordered list of finished spans.
    pub(crate) fn encode(self, traces: &[Vec<SpanData>]) -> Result<Vec<u8>, Error> {
        match self {
            ApiVersion::V03 => v03::encode(traces),
            ApiVersion::V05 => v05::encode(traces),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn sample_span(trace_id: u64, span_id: u64, parent_id: u64) -> SpanData {
        let mut meta = HashMap::new();
        meta.insert("http.method".to_owned(), "GET".to_owned());
        let mut metrics = HashMap::new();
        metrics.insert("_sampling_priority_v1".to_owned(), 1.0);
        SpanData {
            name: "web.request".to_owned(),
            service: "api".to_owned(),
            resource: "/users".to_owned(),
            span_type: "web".to_owned(),
            start: 1_700_000_000_000_000_000,
            duration: 50_000_000,
            meta,
            metrics,
            span_id,
            trace_id,
            parent_id,
            error: 0,
            local_root: parent_id == 0,
        }
    }

    #[test]
    fn versions_advertise_paths_and_content_type() {
        assert_eq!(ApiVersion::V03.path(), "/v0.3/traces");
        assert_eq!(ApiVersion::V05.path(), "/v0.5/traces");
        assert_eq!(ApiVersion::default(), ApiVersion::V05);
        assert_eq!(ApiVersion::V05.content_type(), "application/msgpack");
    }

    #[test]
    fn empty_batches_still_encode() {
        // A v0.3 empty batch is a zero-length msgpack array.
        assert_eq!(ApiVersion::V03.encode(&[]).unwrap(), vec![0x90]);
    }
}
