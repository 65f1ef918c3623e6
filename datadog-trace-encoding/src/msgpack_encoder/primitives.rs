// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Low-level writers for msgpack type-tagged fields.
//!
//! These helpers know nothing about spans; they append one typed value to
//! any [`std::io::Write`] sink and normalize the different `rmp` error
//! shapes into [`EncodeError`]. Overflow against the owning encoder's size
//! limits is not detected here: the owner checks its cursor after packing.

use crate::error::EncodeError;
use rmp::encode;
use std::borrow::Borrow;
use std::io;

/// A numeric field value, resolved to its wire encoding at the call site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Number::Unsigned(value)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Signed(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Signed(value.into())
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

/// Number of bytes msgpack needs for the length prefix of an array of `n`
/// elements: a fixarray marker, an array16 or an array32 header.
pub fn array_prefix_size(n: usize) -> usize {
    if n < 16 {
        1
    } else if n < (1 << 16) {
        3
    } else {
        5
    }
}

/// Appends a numeric value. Non-negative signed values take the unsigned
/// encoding so equal magnitudes share a wire representation.
pub fn pack_number<W: io::Write>(wr: &mut W, value: Number) -> Result<(), EncodeError> {
    match value {
        Number::Unsigned(n) => {
            encode::write_uint(wr, n)?;
        }
        Number::Signed(n) => {
            if n >= 0 {
                encode::write_uint(wr, n as u64)?;
            } else {
                encode::write_sint(wr, n)?;
            }
        }
        Number::Float(n) => {
            encode::write_f64(wr, n)?;
        }
    }
    Ok(())
}

/// Appends a UTF-8 string with its msgpack str header.
pub fn pack_str<W: io::Write>(wr: &mut W, value: &str) -> Result<(), EncodeError> {
    if value.len() > u32::MAX as usize {
        return Err(EncodeError::ValueTooLarge);
    }
    encode::write_str(wr, value)?;
    Ok(())
}

/// Appends an optional text field: the empty string stands for an absent
/// value and is emitted as the nil tag.
pub fn pack_text<W: io::Write, T: Borrow<str>>(wr: &mut W, value: &T) -> Result<(), EncodeError> {
    let text = value.borrow();
    if text.is_empty() {
        encode::write_nil(wr)?;
        Ok(())
    } else {
        pack_str(wr, text)
    }
}
