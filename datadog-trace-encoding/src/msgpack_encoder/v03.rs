// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-describing trace dialect: each span is a msgpack map with literal
//! field-name keys.

use crate::error::EncodeError;
use crate::msgpack_encoder::buffer::TraceBuffer;
use crate::msgpack_encoder::primitives::{pack_number, pack_str, pack_text, Number};
use crate::msgpack_encoder::{EncoderState, TraceEncoder};
use crate::span::{trace_origin, Span, SpanText, ORIGIN_KEY};
use rmp::encode::{write_array_len, write_map_len};
use std::sync::Mutex;
use tracing::debug;

/// Buffered encoder for the map-based trace dialect.
pub struct MsgpackEncoderV03 {
    state: Mutex<EncoderState>,
}

impl MsgpackEncoderV03 {
    /// Creates an encoder bounded by `max_size` payload bytes, refusing any
    /// single trace encoding to more than `max_item_size` bytes.
    pub fn new(max_size: usize, max_item_size: usize) -> Result<Self, EncodeError> {
        Ok(MsgpackEncoderV03 {
            state: Mutex::new(EncoderState::new(max_size, max_item_size)?),
        })
    }
}

impl TraceEncoder for MsgpackEncoderV03 {
    fn put<T: SpanText>(&self, trace: &[Span<T>]) -> Result<(), EncodeError> {
        let mut state = self.state.lock().unwrap();
        let checkpoint = state.buf.len();
        if let Err(err) = pack_trace(&mut state.buf, trace) {
            state.buf.truncate(checkpoint);
            return Err(err);
        }
        state.commit(checkpoint, 0)
    }

    fn flush(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let count = state.count;
        let payload = state.finish()?;
        debug!("flushed {count} traces ({} bytes)", payload.len());
        Some(payload)
    }

    fn size(&self) -> usize {
        self.state.lock().unwrap().size()
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap().count as usize
    }
}

fn pack_trace<T: SpanText>(buf: &mut TraceBuffer, trace: &[Span<T>]) -> Result<(), EncodeError> {
    write_array_len(buf, trace.len() as u32)?;
    let origin = trace_origin(trace);
    for span in trace {
        pack_span(buf, span, origin)?;
    }
    Ok(())
}

fn pack_span<T: SpanText>(
    buf: &mut TraceBuffer,
    span: &Span<T>,
    origin: &str,
) -> Result<(), EncodeError> {
    let has_type = !span.r#type.borrow().is_empty();
    let has_meta = !span.meta.is_empty() || !origin.is_empty();
    let has_metrics = !span.metrics.is_empty();
    let map_len = 9 + has_type as u32 + has_meta as u32 + has_metrics as u32;

    write_map_len(buf, map_len)?;

    pack_str(buf, "trace_id")?;
    pack_number(buf, Number::Unsigned(span.trace_id))?;

    pack_str(buf, "parent_id")?;
    pack_number(buf, Number::Unsigned(span.parent_id))?;

    pack_str(buf, "span_id")?;
    pack_number(buf, Number::Unsigned(span.span_id))?;

    pack_str(buf, "service")?;
    pack_text(buf, &span.service)?;

    pack_str(buf, "resource")?;
    pack_text(buf, &span.resource)?;

    pack_str(buf, "name")?;
    pack_text(buf, &span.name)?;

    pack_str(buf, "error")?;
    pack_number(buf, Number::Signed(span.error.into()))?;

    pack_str(buf, "start")?;
    pack_number(buf, Number::Signed(span.start))?;

    pack_str(buf, "duration")?;
    pack_number(buf, Number::Signed(span.duration))?;

    if has_type {
        pack_str(buf, "type")?;
        pack_text(buf, &span.r#type)?;
    }

    if has_meta {
        let has_origin = !origin.is_empty();
        pack_str(buf, "meta")?;
        write_map_len(buf, (span.meta.len() + has_origin as usize) as u32)?;
        for (key, value) in span.meta.iter() {
            pack_str(buf, key.borrow())?;
            pack_str(buf, value.borrow())?;
        }
        if has_origin {
            pack_str(buf, ORIGIN_KEY)?;
            pack_str(buf, origin)?;
        }
    }

    if has_metrics {
        pack_str(buf, "metrics")?;
        write_map_len(buf, span.metrics.len() as u32)?;
        for (key, value) in span.metrics.iter() {
            pack_str(buf, key.borrow())?;
            pack_number(buf, Number::Float(*value))?;
        }
    }

    Ok(())
}
