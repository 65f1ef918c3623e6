// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::FxIndexSet;
use std::fmt::Debug;

/// Id of an interned string; also its index in the emitted `string_table`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn from_offset<T>(offset: T) -> Self
    where
        T: TryInto<u32>,
        T::Error: Debug,
    {
        Self(offset.try_into().expect("StringId to fit into a u32"))
    }
}

impl From<StringId> for i64 {
    fn from(s: StringId) -> Self {
        s.0.into()
    }
}

impl From<StringId> for usize {
    fn from(s: StringId) -> Self {
        s.0 as usize
    }
}

/// Holds unique strings and hands out [StringId]s that correspond to the
/// order the strings were inserted. The empty string is always item 0, which
/// doubles as the encoding of an absent value.
pub struct StringTable {
    strings: FxIndexSet<Box<str>>,
}

impl StringTable {
    pub fn new() -> Self {
        let mut strings = FxIndexSet::<Box<str>>::default();
        strings.insert("".into());
        Self { strings }
    }

    /// Adds the string to the table if it isn't present already, and returns
    /// the [StringId] corresponding to its insertion order.
    pub fn intern(&mut self, item: &str) -> StringId {
        // For performance, delay converting the &str to an owned string
        // until it has been determined to not exist in the set. This avoids
        // temporary allocations.
        let index = match self.strings.get_index_of(item) {
            Some(index) => index,
            None => {
                let (index, _inserted) = self.strings.insert_full(item.into());
                debug_assert!(_inserted);
                index
            }
        };
        StringId::from_offset(index)
    }

    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Drains the table into the final `string_table` field, in insertion
    /// order. Consuming the table ends the interning phase: no further ids
    /// can be produced against the emitted ordering.
    pub fn into_strings(self) -> Vec<String> {
        self.strings.into_iter().map(Into::into).collect()
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
