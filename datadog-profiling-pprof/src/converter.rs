// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stateful accumulator turning grouped event records into pprof entities.
//!
//! Filenames, function names and label strings are interned once; unique
//! (filename, funcname) pairs become `Function`s and (filename, line,
//! funcname) triples become `Location`s, with ids handed out monotonically
//! from 1 the way the pprof schema expects. Sample values aggregate under a
//! (location-stack, label-set) key until the profile is built.

use crate::event::{
    AllocSampleEvent, Frame, HeapSampleEvent, LockAcquireEvent, LockReleaseEvent,
    StackExceptionSampleEvent, StackSampleEvent,
};
use crate::exporter::{ExceptionGroupKey, LockGroupKey, MemoryGroupKey, StackGroupKey};
use crate::pprof;
use crate::string_table::StringTable;
use crate::FxIndexMap;
use tracing::debug;

/// Function name stored for a frame whose symbol could not be resolved.
const UNKNOWN_FUNCTION: &str = "<unknown function>";

/// Ordered label pairs attached to one sample.
pub(crate) type Labels = Vec<(&'static str, String)>;

/// Aggregation key: the location-id stack plus the label set.
pub(crate) type SampleKey = (Vec<u64>, Labels);

/// Accumulates converted events; single-use for emission. The converter is
/// not meant to be shared between producers: one thread feeds it, then
/// [`PprofConverter::build_profile`] consumes it.
#[derive(Default)]
pub struct PprofConverter {
    strings: StringTable,
    functions: FxIndexMap<(String, String), pprof::Function>,
    locations: FxIndexMap<(String, i64, Option<String>), pprof::Location>,
    location_values: FxIndexMap<SampleKey, FxIndexMap<&'static str, i64>>,
}

impl PprofConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_function(&mut self, filename: &str, funcname: &str) -> u64 {
        let next_id = self.functions.len() as u64 + 1;
        let strings = &mut self.strings;
        self.functions
            .entry((filename.to_owned(), funcname.to_owned()))
            .or_insert_with(|| pprof::Function {
                id: next_id,
                name: strings.intern(funcname).into(),
                filename: strings.intern(filename).into(),
                ..Default::default()
            })
            .id
    }

    fn to_location(&mut self, filename: &str, lineno: i64, funcname: Option<&str>) -> u64 {
        let key = (filename.to_owned(), lineno, funcname.map(str::to_owned));
        if let Some(location) = self.locations.get(&key) {
            return location.id;
        }
        let function_id = self.to_function(filename, funcname.unwrap_or(UNKNOWN_FUNCTION));
        let id = self.locations.len() as u64 + 1;
        self.locations.insert(
            key,
            pprof::Location {
                id,
                lines: vec![pprof::Line {
                    function_id,
                    line: lineno,
                }],
                ..Default::default()
            },
        );
        id
    }

    /// Maps the captured frames to location ids, appending a synthetic
    /// location when the collector truncated the stack.
    fn to_locations(&mut self, frames: &[Frame], nframes: u32) -> Vec<u64> {
        let mut ids: Vec<u64> = frames
            .iter()
            .map(|frame| self.to_location(&frame.filename, frame.lineno, Some(&frame.name)))
            .collect();

        let omitted = (nframes as usize).saturating_sub(frames.len());
        if omitted > 0 {
            let name = format!(
                "<{omitted} frame{} omitted>",
                if omitted > 1 { "s" } else { "" }
            );
            ids.push(self.to_location("", 0, Some(&name)));
        }
        ids
    }

    fn values_mut(&mut self, key: SampleKey) -> &mut FxIndexMap<&'static str, i64> {
        self.location_values.entry(key).or_default()
    }

    pub fn convert_stack_events(&mut self, key: &StackGroupKey<'_>, events: &[&StackSampleEvent]) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = vec![
            ("thread id", key.thread_id.clone()),
            ("thread native id", key.thread_native_id.clone()),
            ("thread name", key.thread_name.clone()),
            ("task id", key.task_id.clone()),
            ("task name", key.task_name.clone()),
            ("trace id", key.trace_id.clone()),
            ("span id", key.span_id.clone()),
            ("trace endpoint", key.trace_endpoint.clone()),
            ("trace type", key.trace_type.clone()),
        ];
        let values = self.values_mut((locations, labels));
        values.insert("cpu-samples", events.len() as i64);
        values.insert("cpu-time", events.iter().map(|e| e.cpu_time_ns).sum());
        values.insert("wall-time", events.iter().map(|e| e.wall_time_ns).sum());
    }

    pub fn convert_stack_exception_events(
        &mut self,
        key: &ExceptionGroupKey<'_>,
        events: &[&StackExceptionSampleEvent],
    ) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = vec![
            ("thread id", key.thread_id.clone()),
            ("thread native id", key.thread_native_id.clone()),
            ("thread name", key.thread_name.clone()),
            ("trace id", key.trace_id.clone()),
            ("span id", key.span_id.clone()),
            ("trace endpoint", key.trace_endpoint.clone()),
            ("trace type", key.trace_type.clone()),
            ("exception type", key.exc_type_name.clone()),
        ];
        let values = self.values_mut((locations, labels));
        values.insert("exception-samples", events.len() as i64);
    }

    pub fn convert_memalloc_events(
        &mut self,
        key: &MemoryGroupKey<'_>,
        events: &[&AllocSampleEvent],
    ) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = memory_labels(key);
        let nb_events = events.len();

        let sampled: f64 = events.iter().map(|e| e.nevents as f64).sum();
        let capture_ratio: f64 =
            events.iter().map(|e| e.capture_pct).sum::<f64>() / (nb_events as f64 * 100.0);
        let average_size: f64 =
            events.iter().map(|e| e.size as f64).sum::<f64>() / nb_events as f64;

        let values = self.values_mut((locations, labels));
        values.insert("alloc-samples", nb_events as i64);
        values.insert(
            "alloc-space",
            (sampled * capture_ratio * average_size).round() as i64,
        );
    }

    /// Heap snapshots accumulate: every live allocation adds its size to
    /// whatever the key already holds.
    pub fn convert_memalloc_heap_event(&mut self, key: &MemoryGroupKey<'_>, event: &HeapSampleEvent) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = memory_labels(key);
        let values = self.values_mut((locations, labels));
        *values.entry("heap-space").or_insert(0) += event.size as i64;
    }

    pub fn convert_lock_acquire_events(
        &mut self,
        key: &LockGroupKey<'_>,
        events: &[&LockAcquireEvent],
        sampling_ratio: f64,
    ) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = lock_labels(key);
        let wait: i64 = events.iter().map(|e| e.wait_time_ns).sum();
        let values = self.values_mut((locations, labels));
        values.insert("lock-acquire", events.len() as i64);
        values.insert("lock-acquire-wait", (wait as f64 / sampling_ratio) as i64);
    }

    pub fn convert_lock_release_events(
        &mut self,
        key: &LockGroupKey<'_>,
        events: &[&LockReleaseEvent],
        sampling_ratio: f64,
    ) {
        let locations = self.to_locations(key.frames, key.nframes);
        let labels = lock_labels(key);
        let held: i64 = events.iter().map(|e| e.locked_for_ns).sum();
        let values = self.values_mut((locations, labels));
        values.insert("lock-release", events.len() as i64);
        values.insert("lock-release-hold", (held as f64 / sampling_ratio) as i64);
    }

    /// Emits the final profile. Consuming the converter ends the interning
    /// phase; the string table is drained last, after every id it backs has
    /// been produced.
    pub fn build_profile(
        mut self,
        start_time_ns: i64,
        duration_ns: i64,
        period: Option<i64>,
        sample_types: &[(&str, &str)],
        program_name: &str,
    ) -> pprof::Profile {
        let sample_type_msgs: Vec<pprof::ValueType> = sample_types
            .iter()
            .map(|(name, unit)| pprof::ValueType {
                r#type: self.strings.intern(name).into(),
                unit: self.strings.intern(unit).into(),
            })
            .collect();

        // Canonical emission order: lexicographic over the aggregation key.
        let mut entries: Vec<_> = std::mem::take(&mut self.location_values)
            .into_iter()
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut samples = Vec::with_capacity(entries.len());
        for ((location_ids, labels), values) in entries {
            let labels = labels
                .iter()
                .map(|(key, value)| pprof::Label {
                    key: self.strings.intern(key).into(),
                    str: self.strings.intern(value).into(),
                    ..Default::default()
                })
                .collect();
            let values = sample_types
                .iter()
                .map(|(name, _)| values.get(*name).copied().unwrap_or(0))
                .collect();
            samples.push(pprof::Sample {
                location_ids,
                values,
                labels,
            });
        }

        let mut locations: Vec<_> = std::mem::take(&mut self.locations).into_values().collect();
        locations.sort_unstable_by_key(|location| location.id);
        let mut functions: Vec<_> = std::mem::take(&mut self.functions).into_values().collect();
        functions.sort_unstable_by_key(|function| function.id);

        let mappings = vec![pprof::Mapping {
            id: 1,
            filename: self.strings.intern(program_name).into(),
            ..Default::default()
        }];

        let period_type = pprof::ValueType {
            r#type: self.strings.intern("time").into(),
            unit: self.strings.intern("nanoseconds").into(),
        };

        debug!(
            "built profile: {} samples, {} locations, {} functions",
            samples.len(),
            locations.len(),
            functions.len()
        );

        pprof::Profile {
            sample_types: sample_type_msgs,
            samples,
            mappings,
            locations,
            functions,
            string_table: self.strings.into_strings(),
            time_nanos: start_time_ns,
            duration_nanos: duration_ns,
            period_type: Some(period_type),
            period: period.unwrap_or(0),
            ..Default::default()
        }
    }
}

fn memory_labels(key: &MemoryGroupKey<'_>) -> Labels {
    vec![
        ("thread id", key.thread_id.clone()),
        ("thread native id", key.thread_native_id.clone()),
        ("thread name", key.thread_name.clone()),
    ]
}

fn lock_labels(key: &LockGroupKey<'_>) -> Labels {
    vec![
        ("thread id", key.thread_id.clone()),
        ("thread native id", key.thread_native_id.clone()),
        ("thread name", key.thread_name.clone()),
        ("lock name", key.lock_name.clone()),
        ("trace id", key.trace_id.clone()),
        ("span id", key.span_id.clone()),
        ("trace endpoint", key.trace_endpoint.clone()),
        ("trace type", key.trace_type.clone()),
    ]
}
