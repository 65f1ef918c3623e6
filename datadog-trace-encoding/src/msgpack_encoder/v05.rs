// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dictionary-compressed trace dialect: each span is a positional msgpack
//! array and every string travels once, through a shared interned table.

use crate::error::EncodeError;
use crate::msgpack_encoder::buffer::TraceBuffer;
use crate::msgpack_encoder::dict::MsgpackStringTable;
use crate::msgpack_encoder::primitives::{pack_number, Number};
use crate::msgpack_encoder::{EncoderState, TraceEncoder};
use crate::span::{trace_origin, Span, SpanText, ORIGIN_KEY};
use rmp::encode::{write_array_len, write_map_len, write_uint};
use std::sync::Mutex;
use tracing::debug;

/// Number of positional fields in an encoded span.
const SPAN_ELEM_COUNT: u32 = 12;

struct Inner {
    state: EncoderState,
    table: MsgpackStringTable,
}

/// Buffered encoder for the positional trace dialect.
///
/// The flushed payload is a 2-element msgpack array: the interned string
/// table in insertion order, then the traces array.
pub struct MsgpackEncoderV05 {
    inner: Mutex<Inner>,
}

impl MsgpackEncoderV05 {
    /// Creates an encoder bounded by `max_size` payload bytes (string table
    /// included), refusing any single trace whose span bytes exceed
    /// `max_item_size`.
    pub fn new(max_size: usize, max_item_size: usize) -> Result<Self, EncodeError> {
        Ok(MsgpackEncoderV05 {
            inner: Mutex::new(Inner {
                state: EncoderState::new(max_size, max_item_size)?,
                table: MsgpackStringTable::new()?,
            }),
        })
    }
}

impl TraceEncoder for MsgpackEncoderV05 {
    fn put<T: SpanText>(&self, trace: &[Span<T>]) -> Result<(), EncodeError> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { state, table } = &mut *inner;

        table.savepoint();
        let checkpoint = state.buf.len();
        let result = pack_trace(&mut state.buf, table, trace)
            .and_then(|()| state.commit(checkpoint, table.size()));
        if result.is_err() {
            // `commit` rewinds the payload on its own failures; rewinding
            // here as well covers pack errors and is idempotent.
            state.buf.truncate(checkpoint);
            table.rollback();
        }
        result
    }

    fn flush(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let Inner { state, table } = &mut *inner;
        if state.count == 0 {
            return None;
        }

        let count = state.count;
        state.buf.patch_array32(count);
        table.append_raw(state.buf.as_bytes());
        let payload = table.flush();
        state.reset();
        debug!("flushed {count} traces ({} bytes)", payload.len());
        Some(payload)
    }

    fn size(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.state.size() + inner.table.size()
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().state.count as usize
    }
}

fn pack_trace<T: SpanText>(
    buf: &mut TraceBuffer,
    table: &mut MsgpackStringTable,
    trace: &[Span<T>],
) -> Result<(), EncodeError> {
    write_array_len(buf, trace.len() as u32)?;
    let origin = trace_origin(trace);
    for span in trace {
        pack_span(buf, table, span, origin)?;
    }
    Ok(())
}

fn pack_string_id<T: SpanText>(
    buf: &mut TraceBuffer,
    table: &mut MsgpackStringTable,
    text: &T,
) -> Result<(), EncodeError> {
    let id = table.index(text.borrow())?;
    write_uint(buf, id.into())?;
    Ok(())
}

fn pack_span<T: SpanText>(
    buf: &mut TraceBuffer,
    table: &mut MsgpackStringTable,
    span: &Span<T>,
    origin: &str,
) -> Result<(), EncodeError> {
    write_array_len(buf, SPAN_ELEM_COUNT)?;

    pack_string_id(buf, table, &span.service)?;
    pack_string_id(buf, table, &span.name)?;
    pack_string_id(buf, table, &span.resource)?;

    pack_number(buf, Number::Unsigned(span.trace_id))?;
    pack_number(buf, Number::Unsigned(span.span_id))?;
    pack_number(buf, Number::Unsigned(span.parent_id))?;
    pack_number(buf, Number::Signed(span.start))?;
    pack_number(buf, Number::Signed(span.duration))?;
    pack_number(buf, Number::Signed(span.error.into()))?;

    let has_origin = !origin.is_empty();
    write_map_len(buf, (span.meta.len() + has_origin as usize) as u32)?;
    for (key, value) in span.meta.iter() {
        pack_string_id(buf, table, key)?;
        pack_string_id(buf, table, value)?;
    }
    if has_origin {
        let key = table.index(ORIGIN_KEY)?;
        write_uint(buf, key.into())?;
        let value = table.index(origin)?;
        write_uint(buf, value.into())?;
    }

    write_map_len(buf, span.metrics.len() as u32)?;
    for (key, value) in span.metrics.iter() {
        pack_string_id(buf, table, key)?;
        pack_number(buf, Number::Float(*value))?;
    }

    pack_string_id(buf, table, &span.r#type)?;
    Ok(())
}
