// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered msgpack encoders for the two trace wire dialects.

use crate::error::EncodeError;
use crate::msgpack_encoder::buffer::{TraceBuffer, ARRAY32_PREFIX_SIZE};
use crate::msgpack_encoder::primitives::array_prefix_size;
use crate::span::{Span, SpanText};

mod buffer;
mod dict;
pub mod primitives;
pub mod v03;
pub mod v05;

pub use v03::MsgpackEncoderV03;
pub use v05::MsgpackEncoderV05;

/// Content type advertised by both trace encoders.
pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// Default maximum payload size, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8 << 20;

/// Default maximum size of a single encoded trace, in bytes.
pub const DEFAULT_ITEM_SIZE: usize = 8 << 20;

/// A size-bounded encoder accumulating traces into one binary payload.
///
/// Implementations are safe to share between producer threads: `put` and
/// `flush` serialize on an internal mutex, and a `put` that fails for any
/// reason leaves the encoder byte-identical to its pre-call state. Within a
/// single producer, traces appear in the flushed payload in `put` order.
#[allow(clippy::len_without_is_empty)]
pub trait TraceEncoder {
    /// Appends one trace to the payload under construction.
    ///
    /// # Errors
    ///
    /// * [`EncodeError::BufferFull`] - the payload limit is reached; `flush`
    ///   and retry the same trace.
    /// * [`EncodeError::ItemTooLarge`] - this trace can never fit; drop it.
    ///
    /// Any other variant reports a defect in the trace itself. In every
    /// error case the trace is absent from the next `flush`.
    fn put<T: SpanText>(&self, trace: &[Span<T>]) -> Result<(), EncodeError>;

    /// Drains the accumulated traces into a finished payload, or `None`
    /// when nothing was accepted since the last flush. The encoder resets
    /// in place and reuses its buffer.
    fn flush(&self) -> Option<Vec<u8>>;

    /// Logical payload size, in bytes, including the not-yet-written array
    /// length prefix.
    fn size(&self) -> usize;

    /// Number of traces accepted since the last flush.
    fn len(&self) -> usize;

    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }
}

/// Buffer, limits and item counter shared by the concrete encoders.
pub(crate) struct EncoderState {
    buf: TraceBuffer,
    count: u32,
    max_size: usize,
    max_item_size: usize,
}

impl EncoderState {
    fn new(max_size: usize, max_item_size: usize) -> Result<Self, EncodeError> {
        Ok(EncoderState {
            buf: TraceBuffer::with_capacity(ARRAY32_PREFIX_SIZE, max_size)?,
            count: 0,
            max_size,
            max_item_size,
        })
    }

    /// `length + array_prefix_size(count) - reserved_prefix`: what the
    /// payload will occupy once the length prefix is patched in.
    fn size(&self) -> usize {
        self.buf.len() + array_prefix_size(self.count as usize) - self.buf.reserved()
    }

    /// Validates the item written since `checkpoint` against both limits and
    /// either accepts it or rewinds the cursor. `extra` is size owed outside
    /// this buffer (the V05 string table region).
    fn commit(&mut self, checkpoint: usize, extra: usize) -> Result<(), EncodeError> {
        let item_size = self.buf.len() - checkpoint;
        if item_size > self.max_item_size {
            self.buf.truncate(checkpoint);
            return Err(EncodeError::ItemTooLarge(item_size - self.max_item_size));
        }

        let total = self.buf.len() + array_prefix_size(self.count as usize + 1)
            - self.buf.reserved()
            + extra;
        if total > self.max_size {
            self.buf.truncate(checkpoint);
            return Err(EncodeError::BufferFull(total - self.max_size));
        }

        self.count += 1;
        Ok(())
    }

    /// Patches the traces-array header and snapshots the payload, then
    /// resets for reuse. Returns `None` when no trace was accepted.
    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.count == 0 {
            return None;
        }
        self.buf.patch_array32(self.count);
        let payload = self.buf.as_bytes().to_vec();
        self.reset();
        Some(payload)
    }

    fn reset(&mut self) {
        self.buf.reset();
        self.count = 0;
    }
}
