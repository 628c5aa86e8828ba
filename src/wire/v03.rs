//! v0.3 ingestion format: an array of traces, each an array of spans, each
//! span a string-keyed field map. The `type` entry is written only when the
//! span carries one, so maps have 11 or 12 entries.

use crate::error::Error;
use crate::span::SpanData;

pub(crate) fn encode(traces: &[Vec<SpanData>]) -> Result<Vec<u8>, Error> {
    let mut encoded = Vec::new();
    rmp::encode::write_array_len(&mut encoded, traces.len() as u32)?;

    for trace in traces {
        rmp::encode::write_array_len(&mut encoded, trace.len() as u32)?;

        for span in trace {
            if span.span_type.is_empty() {
                rmp::encode::write_map_len(&mut encoded, 11)?;
            } else {
                rmp::encode::write_map_len(&mut encoded, 12)?;
                rmp::encode::write_str(&mut encoded, "type")?;
                rmp::encode::write_str(&mut encoded, &span.span_type)?;
            }

            rmp::encode::write_str(&mut encoded, "service")?;
            rmp::encode::write_str(&mut encoded, &span.service)?;

            rmp::encode::write_str(&mut encoded, "name")?;
            rmp::encode::write_str(&mut encoded, &span.name)?;

            rmp::encode::write_str(&mut encoded, "resource")?;
            rmp::encode::write_str(&mut encoded, &span.resource)?;

            rmp::encode::write_str(&mut encoded, "trace_id")?;
            rmp::encode::write_u64(&mut encoded, span.trace_id)?;

            rmp::encode::write_str(&mut encoded, "span_id")?;
            rmp::encode::write_u64(&mut encoded, span.span_id)?;

            rmp::encode::write_str(&mut encoded, "parent_id")?;
            rmp::encode::write_u64(&mut encoded, span.parent_id)?;

            rmp::encode::write_str(&mut encoded, "start")?;
            rmp::encode::write_i64(&mut encoded, span.start)?;

            rmp::encode::write_str(&mut encoded, "duration")?;
            rmp::encode::write_i64(&mut encoded, span.duration)?;

            rmp::encode::write_str(&mut encoded, "error")?;
            rmp::encode::write_i32(&mut encoded, span.error)?;

            rmp::encode::write_str(&mut encoded, "meta")?;
            rmp::encode::write_map_len(&mut encoded, span.meta.len() as u32)?;
            for (key, value) in &span.meta {
                rmp::encode::write_str(&mut encoded, key)?;
                rmp::encode::write_str(&mut encoded, value)?;
            }

            rmp::encode::write_str(&mut encoded, "metrics")?;
            rmp::encode::write_map_len(&mut encoded, span.metrics.len() as u32)?;
            for (key, value) in &span.metrics {
                rmp::encode::write_str(&mut encoded, key)?;
                rmp::encode::write_f64(&mut encoded, *value)?;
            }
        }
    }

    Ok(encoded)
}
