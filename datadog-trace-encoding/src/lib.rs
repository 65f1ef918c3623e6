// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered, size-bounded binary encoders for trace payloads.
//!
//! Two wire dialects are supported. V03 serializes every span as a
//! self-describing msgpack map with literal field-name keys. V05 serializes
//! spans as fixed positional arrays in which every string has been replaced
//! by an index into a shared, interned string table, and ships the table
//! alongside the payload.
//!
//! Both encoders accumulate traces up to a configured payload size and hand
//! the finished bytes to the transport in a single `flush`. `put` is
//! transactional: a trace that fails to fit (or fails to serialize) leaves
//! the encoder byte-identical to its state before the call.

pub mod msgpack_encoder;
pub mod span;

mod error;

pub use error::EncodeError;
pub use msgpack_encoder::{
    MsgpackEncoderV03, MsgpackEncoderV05, TraceEncoder, DEFAULT_BUFFER_SIZE,
    DEFAULT_ITEM_SIZE, MSGPACK_CONTENT_TYPE,
};
