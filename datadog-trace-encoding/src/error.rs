// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rmp::encode::ValueWriteError;
use std::io;

/// Errors surfaced by the trace encoders.
///
/// `BufferFull` is transient: the caller is expected to `flush` and retry
/// the same trace. `ItemTooLarge` is permanent for that trace and the caller
/// must drop it. Every other variant is either fatal at construction
/// (`AllocationFailed`) or a data defect in the input. No variant leaves the
/// encoder in a partially-written state: `put` rolls back before returning.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The payload would exceed the encoder's maximum buffer size. Carries
    /// the number of bytes by which the limit would have been exceeded.
    #[error("trace buffer is full ({0} bytes over the limit)")]
    BufferFull(usize),
    /// A single encoded trace exceeds the per-item limit, by the carried
    /// number of bytes.
    #[error("encoded trace is too large ({0} bytes over the per-item limit)")]
    ItemTooLarge(usize),
    /// The backing buffer could not be allocated at construction.
    #[error("failed to allocate the encoder buffer")]
    AllocationFailed,
    /// A string is longer than msgpack's 32-bit length prefix allows.
    #[error("string length exceeds the msgpack 32-bit limit")]
    ValueTooLarge,
    /// An unexpected failure from the msgpack primitives. With a correctly
    /// sized buffer this does not happen; it is surfaced verbatim.
    #[error("msgpack write failed: {0}")]
    Encoding(#[from] io::Error),
}

impl From<ValueWriteError<io::Error>> for EncodeError {
    fn from(err: ValueWriteError<io::Error>) -> Self {
        match err {
            ValueWriteError::InvalidMarkerWrite(e)
            | ValueWriteError::InvalidDataWrite(e) => EncodeError::Encoding(e),
        }
    }
}
