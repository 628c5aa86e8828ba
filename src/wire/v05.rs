//! v0.5 ingestion format. The payload is a two-element array: a string table,
//! then the traces. Each span is an array of exactly 12 elements in a fixed
//! order, with every string replaced by its table index:
//!
//! ```text
//!  0: service   (u32 index)    6: start     (i64)
//!  1: name      (u32 index)    7: duration  (i64)
//!  2: resource  (u32 index)    8: error     (i32)
//!  3: trace_id  (u64)          9: meta      (map u32 -> u32)
//!  4: span_id   (u64)         10: metrics   (map u32 -> f64)
//!  5: parent_id (u64)         11: type      (u32 index)
//! ```
//!
//! Unset strings are encoded as the interned empty string; no element may be
//! omitted.

use crate::error::Error;
use crate::span::SpanData;
use crate::wire::intern::StringInterner;

const SPAN_NUM_ELEMENTS: u32 = 12;

pub(crate) fn encode(traces: &[Vec<SpanData>]) -> Result<Vec<u8>, Error> {
    let mut interner = StringInterner::new();
    let encoded_traces = encode_traces(&mut interner, traces)?;

    let mut payload = Vec::new();
    rmp::encode::write_array_len(&mut payload, 2)?;
    interner.write_table(&mut payload)?;
    payload.extend_from_slice(&encoded_traces);

    Ok(payload)
}

fn encode_traces(interner: &mut StringInterner, traces: &[Vec<SpanData>]) -> Result<Vec<u8>, Error> {
    let mut encoded = Vec::new();
    rmp::encode::write_array_len(&mut encoded, traces.len() as u32)?;

    for trace in traces {
        rmp::encode::write_array_len(&mut encoded, trace.len() as u32)?;

        for span in trace {
            rmp::encode::write_array_len(&mut encoded, SPAN_NUM_ELEMENTS)?;
            rmp::encode::write_u32(&mut encoded, interner.intern(&span.service))?;
            rmp::encode::write_u32(&mut encoded, interner.intern(&span.name))?;
            rmp::encode::write_u32(&mut encoded, interner.intern(&span.resource))?;
            rmp::encode::write_u64(&mut encoded, span.trace_id)?;
            rmp::encode::write_u64(&mut encoded, span.span_id)?;
            rmp::encode::write_u64(&mut encoded, span.parent_id)?;
            rmp::encode::write_i64(&mut encoded, span.start)?;
            rmp::encode::write_i64(&mut encoded, span.duration)?;
            rmp::encode::write_i32(&mut encoded, span.error)?;

            rmp::encode::write_map_len(&mut encoded, span.meta.len() as u32)?;
            for (key, value) in &span.meta {
                rmp::encode::write_u32(&mut encoded, interner.intern(key))?;
                rmp::encode::write_u32(&mut encoded, interner.intern(value))?;
            }

            rmp::encode::write_map_len(&mut encoded, span.metrics.len() as u32)?;
            for (key, value) in &span.metrics {
                rmp::encode::write_u32(&mut encoded, interner.intern(key))?;
                rmp::encode::write_f64(&mut encoded, *value)?;
            }

            rmp::encode::write_u32(&mut encoded, interner.intern(&span.span_type))?;
        }
    }

    Ok(encoded)
}
