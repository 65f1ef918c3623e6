// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw event records delivered by the profiling collectors.
//!
//! The collectors themselves are out of scope; they hand over plain data.
//! `Option` marks the fields a collector may not be able to resolve (thread
//! names, trace context, task identity); those project to the empty string
//! when events are grouped and labelled.

/// One frame of a captured call stack.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Frame {
    pub filename: String,
    pub lineno: i64,
    pub name: String,
}

impl Frame {
    pub fn new(filename: impl Into<String>, lineno: i64, name: impl Into<String>) -> Self {
        Frame {
            filename: filename.into(),
            lineno,
            name: name.into(),
        }
    }
}

/// A CPU/wall-time sample of one thread (or task) stack.
#[derive(Clone, Debug, Default)]
pub struct StackSampleEvent {
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub task_id: Option<u64>,
    pub task_name: Option<String>,
    pub trace_id: Option<u64>,
    pub span_id: Option<u64>,
    pub trace_resource: Option<String>,
    pub trace_type: Option<String>,
    pub frames: Vec<Frame>,
    /// Real depth of the sampled stack; anything beyond `frames.len()` was
    /// truncated by the collector.
    pub nframes: u32,
    pub wall_time_ns: i64,
    pub cpu_time_ns: i64,
    /// Configured sampling period at capture time, in nanoseconds.
    pub sampling_period: u64,
}

/// A stack captured while an exception was being raised.
#[derive(Clone, Debug, Default)]
pub struct StackExceptionSampleEvent {
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub trace_id: Option<u64>,
    pub span_id: Option<u64>,
    pub trace_resource: Option<String>,
    pub trace_type: Option<String>,
    pub frames: Vec<Frame>,
    pub nframes: u32,
    pub exc_type_name: Option<String>,
}

/// A sampled allocation.
#[derive(Clone, Debug, Default)]
pub struct AllocSampleEvent {
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub frames: Vec<Frame>,
    pub nframes: u32,
    /// Allocated size in bytes.
    pub size: u64,
    /// Percentage of allocation events the collector managed to capture.
    pub capture_pct: f64,
    /// Number of allocations the sampling window observed.
    pub nevents: u64,
}

/// One live allocation from a heap snapshot.
#[derive(Clone, Debug, Default)]
pub struct HeapSampleEvent {
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub frames: Vec<Frame>,
    pub nframes: u32,
    pub size: u64,
}

/// A sampled lock acquisition.
#[derive(Clone, Debug, Default)]
pub struct LockAcquireEvent {
    pub lock_name: Option<String>,
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub trace_id: Option<u64>,
    pub span_id: Option<u64>,
    pub trace_resource: Option<String>,
    pub trace_type: Option<String>,
    pub frames: Vec<Frame>,
    pub nframes: u32,
    pub wait_time_ns: i64,
    /// Percentage of lock events the collector sampled.
    pub sampling_pct: u64,
}

/// A sampled lock release.
#[derive(Clone, Debug, Default)]
pub struct LockReleaseEvent {
    pub lock_name: Option<String>,
    pub thread_id: Option<u64>,
    pub thread_native_id: Option<u64>,
    pub thread_name: Option<String>,
    pub trace_id: Option<u64>,
    pub span_id: Option<u64>,
    pub trace_resource: Option<String>,
    pub trace_type: Option<String>,
    pub frames: Vec<Frame>,
    pub nframes: u32,
    pub locked_for_ns: i64,
    pub sampling_pct: u64,
}

/// Everything one export cycle has to say, one list per event class.
#[derive(Clone, Debug, Default)]
pub struct ProfileEvents {
    pub stack: Vec<StackSampleEvent>,
    pub stack_exception: Vec<StackExceptionSampleEvent>,
    pub alloc: Vec<AllocSampleEvent>,
    pub heap: Vec<HeapSampleEvent>,
    pub lock_acquire: Vec<LockAcquireEvent>,
    pub lock_release: Vec<LockReleaseEvent>,
}

impl ProfileEvents {
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
            && self.stack_exception.is_empty()
            && self.alloc.is_empty()
            && self.heap.is_empty()
            && self.lock_acquire.is_empty()
            && self.lock_release.is_empty()
    }
}
