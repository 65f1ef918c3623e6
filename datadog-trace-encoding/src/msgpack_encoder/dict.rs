// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::EncodeError;
use crate::msgpack_encoder::buffer::TraceBuffer;
use crate::msgpack_encoder::primitives::{array_prefix_size, pack_str};
use indexmap::IndexSet;

/// Reserved prefix of the table's buffer: one byte for the enclosing
/// 2-element array marker plus the widest header form for the string array.
pub(crate) const STRING_TABLE_RESERVED: usize = 6;

const EMPTY_STRING_MSGPACK: u8 = 0xa0;

/// Interner backing the positional trace dialect.
///
/// Each distinct string is assigned the next id in insertion order and its
/// msgpack encoding is appended to an owned buffer, so producing the final
/// payload is a matter of patching two array headers into the reserved
/// prefix and gluing the span bytes on the end. Id 0 is the empty string and
/// doubles as the encoding of absent text.
pub(crate) struct MsgpackStringTable {
    strings: IndexSet<String>,
    buf: TraceBuffer,
    savepoint: (usize, usize),
}

impl MsgpackStringTable {
    pub(crate) fn new() -> Result<Self, EncodeError> {
        let mut table = MsgpackStringTable {
            strings: IndexSet::new(),
            buf: TraceBuffer::with_capacity(STRING_TABLE_RESERVED, 4096)?,
            savepoint: (STRING_TABLE_RESERVED, 0),
        };
        table.seed();
        Ok(table)
    }

    // The table always holds the empty string as item 0; its encoding is a
    // bare fixstr marker.
    fn seed(&mut self) {
        self.strings.insert(String::new());
        self.buf.extend_from_slice(&[EMPTY_STRING_MSGPACK]);
    }

    /// Returns the id for `text`, interning it on first sight.
    pub(crate) fn index(&mut self, text: &str) -> Result<u32, EncodeError> {
        if let Some(index) = self.strings.get_index_of(text) {
            return Ok(index as u32);
        }
        let id = u32::try_from(self.strings.len()).map_err(|_| EncodeError::ValueTooLarge)?;
        pack_str(&mut self.buf, text)?;
        self.strings.insert(text.to_owned());
        Ok(id)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }

    /// Size the table region will occupy in the flushed payload: the
    /// interned bytes plus the enclosing headers.
    pub(crate) fn size(&self) -> usize {
        self.buf.len() - self.buf.reserved() + 1 + array_prefix_size(self.strings.len())
    }

    /// Records the current write position so a failed span insertion can
    /// undo any strings it interned.
    pub(crate) fn savepoint(&mut self) {
        self.savepoint = (self.buf.len(), self.strings.len());
    }

    /// Rewinds both the encoded bytes and the index back to the last
    /// savepoint. Rewinding the index too keeps it consistent with the
    /// bytes: an id handed out during the failed insertion must not survive
    /// it, or a later `put` could emit an id whose string was discarded.
    pub(crate) fn rollback(&mut self) {
        let (len, count) = self.savepoint;
        self.buf.truncate(len);
        self.strings.truncate(count);
    }

    /// Concatenates an external byte span onto the table's buffer. Used at
    /// flush time to glue the span payload onto the string-array region.
    pub(crate) fn append_raw(&mut self, src: &[u8]) {
        self.buf.extend_from_slice(src);
    }

    /// Materializes the composite payload: a 2-element array of the string
    /// table and whatever was appended after it. The two headers are
    /// written into the reserved prefix at the exact offsets their widths
    /// dictate, and the returned bytes start at the outer marker.
    fn get_bytes(&mut self) -> Vec<u8> {
        let count = self.strings.len();
        let width = array_prefix_size(count);
        let offset = self.buf.reserved() - 1 - width;

        let bytes = self.buf.as_mut_bytes();
        bytes[offset] = 0x92;
        match width {
            1 => bytes[offset + 1] = 0x90 | count as u8,
            3 => {
                bytes[offset + 1] = 0xdc;
                bytes[offset + 2..offset + 4].copy_from_slice(&(count as u16).to_be_bytes());
            }
            _ => {
                bytes[offset + 1] = 0xdd;
                bytes[offset + 2..offset + 6].copy_from_slice(&(count as u32).to_be_bytes());
            }
        }
        bytes[offset..].to_vec()
    }

    /// `get_bytes` then reset: the table returns to its freshly-seeded
    /// state, ready for the next payload.
    pub(crate) fn flush(&mut self) -> Vec<u8> {
        let payload = self.get_bytes();
        self.strings.clear();
        self.buf.reset();
        self.seed();
        self.savepoint = (self.buf.len(), self.strings.len());
        payload
    }
}
