// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Folds heterogeneous profiling events into the pprof wire format.
//!
//! Collectors deliver batches of raw event records (CPU/wall-time samples,
//! exceptions, allocations, heap snapshots, lock usage). The exporter groups
//! them, the converter deduplicates filenames, function names and labels
//! through an interned string table, and the result is a single
//! [`pprof::Profile`] message with aggregated multi-valued samples.

pub mod converter;
pub mod event;
pub mod exporter;
pub mod pprof;
pub mod string_table;

use std::hash::BuildHasherDefault;

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
pub type FxIndexSet<K> = indexmap::IndexSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;

pub use converter::PprofConverter;
pub use event::{
    AllocSampleEvent, Frame, HeapSampleEvent, LockAcquireEvent, LockReleaseEvent, ProfileEvents,
    StackExceptionSampleEvent, StackSampleEvent,
};
pub use exporter::{PprofExporter, SAMPLE_TYPES};
pub use string_table::{StringId, StringTable};
