// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;
use serde::Serialize;
use std::borrow::Borrow;
use std::hash::Hash;

/// Trait representing the requirements for a type to be used as a Span
/// "string" type. Note: Borrow<str> is not required by the derived traits,
/// but allows map lookups from a static str and empty-string checks.
pub trait SpanText: Eq + Hash + Borrow<str> {}
/// Implement the SpanText trait for any type which satisfies the sub traits.
impl<T: Eq + Hash + Borrow<str>> SpanText for T {}

/// Checks if the `value` represents an empty string. Used to skip
/// serializing empty strings with serde.
fn is_empty_str<T: Borrow<str>>(value: &T) -> bool {
    value.borrow().is_empty()
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// The generic representation of a span consumed by the trace encoders.
///
/// `T` is the type used to represent strings in the span; it can be either
/// owned (e.g. `String`) or borrowed (e.g. `&str`). An absent text field is
/// represented by the empty string: both encoders emit a msgpack nil (V03)
/// or string id 0 (V05) for it.
///
/// `meta` and `metrics` are insertion-ordered maps so that the positional
/// V05 dialect emits pairs deterministically rather than in hash order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Span<T>
where
    T: SpanText,
{
    #[serde(skip_serializing_if = "is_empty_str")]
    pub service: T,
    #[serde(skip_serializing_if = "is_empty_str")]
    pub name: T,
    #[serde(skip_serializing_if = "is_empty_str")]
    pub resource: T,
    #[serde(skip_serializing_if = "is_empty_str")]
    pub r#type: T,
    pub trace_id: u64,
    pub span_id: u64,
    #[serde(skip_serializing_if = "is_default")]
    pub parent_id: u64,
    pub start: i64,
    pub duration: i64,
    #[serde(skip_serializing_if = "is_default")]
    pub error: i32,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub meta: IndexMap<T, T>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub metrics: IndexMap<T, f64>,
    /// Origin of the trace this span belongs to, from its propagation
    /// context. Only the first span of a trace contributes the origin; the
    /// encoders fold it into every span's `meta` under `"_dd.origin"`.
    #[serde(skip)]
    pub dd_origin: T,
}

/// Meta key under which the trace origin is exported.
pub const ORIGIN_KEY: &str = "_dd.origin";

impl<T: SpanText> Span<T> {
    /// Returns the origin carried by this span's context, or `""`.
    pub fn origin(&self) -> &str {
        self.dd_origin.borrow()
    }
}

/// Returns the origin of a trace: the origin of its first span's context.
pub fn trace_origin<T: SpanText>(trace: &[Span<T>]) -> &str {
    trace.first().map_or("", Span::origin)
}
