// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orchestrates one export cycle: group the raw events of each class,
//! drive the converter once per group, and materialize the profile.
//!
//! Grouping keys are projections into owned strings so the sort order is
//! total and stable over every legal field value: absent values become the
//! empty string and numeric ids their decimal form. `BTreeMap` keeps the
//! groups in key order, which makes export output reproducible run to run.

use crate::converter::PprofConverter;
use crate::event::{Frame, ProfileEvents};
use crate::pprof;
use std::collections::BTreeMap;
use tracing::debug;

/// The fixed sample-type list of an emitted profile, in emission order.
pub const SAMPLE_TYPES: [(&str, &str); 11] = [
    ("cpu-samples", "count"),
    ("cpu-time", "nanoseconds"),
    ("wall-time", "nanoseconds"),
    ("exception-samples", "count"),
    ("lock-acquire", "count"),
    ("lock-acquire-wait", "nanoseconds"),
    ("lock-release", "count"),
    ("lock-release-hold", "nanoseconds"),
    ("alloc-samples", "count"),
    ("alloc-space", "bytes"),
    ("heap-space", "bytes"),
];

/// Grouping key for stack samples. Field order is the sort order.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct StackGroupKey<'a> {
    pub thread_id: String,
    pub thread_native_id: String,
    pub thread_name: String,
    pub task_id: String,
    pub task_name: String,
    pub trace_id: String,
    pub span_id: String,
    pub trace_endpoint: String,
    pub trace_type: String,
    pub frames: &'a [Frame],
    pub nframes: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExceptionGroupKey<'a> {
    pub thread_id: String,
    pub thread_native_id: String,
    pub thread_name: String,
    pub trace_id: String,
    pub span_id: String,
    pub trace_endpoint: String,
    pub trace_type: String,
    pub frames: &'a [Frame],
    pub nframes: u32,
    pub exc_type_name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct LockGroupKey<'a> {
    pub lock_name: String,
    pub thread_id: String,
    pub thread_native_id: String,
    pub thread_name: String,
    pub trace_id: String,
    pub span_id: String,
    pub trace_endpoint: String,
    pub trace_type: String,
    pub frames: &'a [Frame],
    pub nframes: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemoryGroupKey<'a> {
    pub thread_id: String,
    pub thread_native_id: String,
    pub thread_name: String,
    pub frames: &'a [Frame],
    pub nframes: u32,
}

fn num_key(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn text_key(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// The endpoint only makes sense for web traces; anything else exports the
/// empty string.
fn endpoint_key(trace_resource: &Option<String>, trace_type: &Option<String>) -> String {
    if trace_type.as_deref() == Some("web") {
        text_key(trace_resource)
    } else {
        String::new()
    }
}

/// Builds profiles out of raw event batches.
#[derive(Clone, Copy, Debug, Default)]
pub struct PprofExporter;

impl PprofExporter {
    pub fn new() -> Self {
        PprofExporter
    }

    /// Folds `events` recorded over `[start_time_ns, end_time_ns]` into a
    /// profile attributed to `program_name`.
    pub fn export(
        &self,
        events: &ProfileEvents,
        start_time_ns: i64,
        end_time_ns: i64,
        program_name: &str,
    ) -> pprof::Profile {
        let mut converter = PprofConverter::new();

        // Stack samples also carry the sampling period; the profile period
        // is the average over every stack event seen.
        let mut sum_period: u64 = 0;
        let mut stack_groups: BTreeMap<StackGroupKey<'_>, Vec<_>> = BTreeMap::new();
        for event in &events.stack {
            sum_period += event.sampling_period;
            let key = StackGroupKey {
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                task_id: num_key(event.task_id),
                task_name: text_key(&event.task_name),
                trace_id: num_key(event.trace_id),
                span_id: num_key(event.span_id),
                trace_endpoint: endpoint_key(&event.trace_resource, &event.trace_type),
                trace_type: text_key(&event.trace_type),
                frames: &event.frames,
                nframes: event.nframes,
            };
            stack_groups.entry(key).or_default().push(event);
        }
        for (key, group) in &stack_groups {
            converter.convert_stack_events(key, group);
        }

        let mut exception_groups: BTreeMap<ExceptionGroupKey<'_>, Vec<_>> = BTreeMap::new();
        for event in &events.stack_exception {
            let key = ExceptionGroupKey {
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                trace_id: num_key(event.trace_id),
                span_id: num_key(event.span_id),
                trace_endpoint: endpoint_key(&event.trace_resource, &event.trace_type),
                trace_type: text_key(&event.trace_type),
                frames: &event.frames,
                nframes: event.nframes,
                exc_type_name: text_key(&event.exc_type_name),
            };
            exception_groups.entry(key).or_default().push(event);
        }
        for (key, group) in &exception_groups {
            converter.convert_stack_exception_events(key, group);
        }

        // Lock events are upscaled by the average sampling ratio of their
        // whole class, not of the group.
        let acquire_ratio = sampling_ratio_avg(
            events.lock_acquire.iter().map(|e| e.sampling_pct),
        );
        let mut acquire_groups: BTreeMap<LockGroupKey<'_>, Vec<_>> = BTreeMap::new();
        for event in &events.lock_acquire {
            let key = LockGroupKey {
                lock_name: text_key(&event.lock_name),
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                trace_id: num_key(event.trace_id),
                span_id: num_key(event.span_id),
                trace_endpoint: endpoint_key(&event.trace_resource, &event.trace_type),
                trace_type: text_key(&event.trace_type),
                frames: &event.frames,
                nframes: event.nframes,
            };
            acquire_groups.entry(key).or_default().push(event);
        }
        for (key, group) in &acquire_groups {
            converter.convert_lock_acquire_events(key, group, acquire_ratio);
        }

        let release_ratio = sampling_ratio_avg(
            events.lock_release.iter().map(|e| e.sampling_pct),
        );
        let mut release_groups: BTreeMap<LockGroupKey<'_>, Vec<_>> = BTreeMap::new();
        for event in &events.lock_release {
            let key = LockGroupKey {
                lock_name: text_key(&event.lock_name),
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                trace_id: num_key(event.trace_id),
                span_id: num_key(event.span_id),
                trace_endpoint: endpoint_key(&event.trace_resource, &event.trace_type),
                trace_type: text_key(&event.trace_type),
                frames: &event.frames,
                nframes: event.nframes,
            };
            release_groups.entry(key).or_default().push(event);
        }
        for (key, group) in &release_groups {
            converter.convert_lock_release_events(key, group, release_ratio);
        }

        let mut alloc_groups: BTreeMap<MemoryGroupKey<'_>, Vec<_>> = BTreeMap::new();
        for event in &events.alloc {
            let key = MemoryGroupKey {
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                frames: &event.frames,
                nframes: event.nframes,
            };
            alloc_groups.entry(key).or_default().push(event);
        }
        for (key, group) in &alloc_groups {
            converter.convert_memalloc_events(key, group);
        }

        // Heap snapshot entries aggregate one by one; the accumulating
        // heap-space value takes care of identical stacks.
        for event in &events.heap {
            let key = MemoryGroupKey {
                thread_id: num_key(event.thread_id),
                thread_native_id: num_key(event.thread_native_id),
                thread_name: text_key(&event.thread_name),
                frames: &event.frames,
                nframes: event.nframes,
            };
            converter.convert_memalloc_heap_event(&key, event);
        }

        let period = if events.stack.is_empty() {
            None
        } else {
            Some((sum_period / events.stack.len() as u64) as i64)
        };

        debug!(
            "exporting profile: {} stack, {} exception, {} alloc, {} heap, {} lock events",
            events.stack.len(),
            events.stack_exception.len(),
            events.alloc.len(),
            events.heap.len(),
            events.lock_acquire.len() + events.lock_release.len(),
        );

        converter.build_profile(
            start_time_ns,
            end_time_ns - start_time_ns,
            period,
            &SAMPLE_TYPES,
            program_name,
        )
    }
}

fn sampling_ratio_avg(sampling_pcts: impl ExactSizeIterator<Item = u64>) -> f64 {
    let count = sampling_pcts.len();
    if count == 0 {
        return 1.0;
    }
    sampling_pcts.sum::<u64>() as f64 / (count as f64 * 100.0)
}
