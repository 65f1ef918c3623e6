// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_trace_encoding::span::Span;
use datadog_trace_encoding::{
    EncodeError, MsgpackEncoderV03, MsgpackEncoderV05, TraceEncoder, DEFAULT_BUFFER_SIZE,
    DEFAULT_ITEM_SIZE, MSGPACK_CONTENT_TYPE,
};
use rmpv::Value;
use std::sync::Arc;
use std::thread;

fn decode(bytes: &[u8]) -> Value {
    rmpv::decode::read_value(&mut &bytes[..]).expect("payload should decode")
}

fn span_map(payload: &Value, trace: usize, span: usize) -> &[(Value, Value)] {
    match &payload[trace][span] {
        Value::Map(pairs) => pairs,
        other => panic!("expected a span map, got {other:?}"),
    }
}

fn field<'a>(pairs: &'a [(Value, Value)], key: &str) -> &'a Value {
    &pairs
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .unwrap_or_else(|| panic!("missing span field {key}"))
        .1
}

fn basic_span() -> Span<&'static str> {
    Span {
        trace_id: 1,
        span_id: 2,
        parent_id: 0,
        service: "s",
        resource: "r",
        name: "n",
        error: 0,
        start: 1000,
        duration: 500,
        ..Default::default()
    }
}

#[test]
fn v03_encodes_the_fixed_field_order() {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    encoder.put(&[basic_span()]).unwrap();
    assert_eq!(1, encoder.len());

    let payload = decode(&encoder.flush().unwrap());
    assert_eq!(1, payload.as_array().unwrap().len());
    let pairs = span_map(&payload, 0, 0);
    assert_eq!(9, pairs.len());

    let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str().unwrap()).collect();
    assert_eq!(
        vec![
            "trace_id", "parent_id", "span_id", "service", "resource", "name", "error", "start",
            "duration"
        ],
        keys
    );
    assert_eq!(Some(1), field(pairs, "trace_id").as_u64());
    assert_eq!(Some(0), field(pairs, "parent_id").as_u64());
    assert_eq!(Some(2), field(pairs, "span_id").as_u64());
    assert_eq!(Some("s"), field(pairs, "service").as_str());
    assert_eq!(Some("r"), field(pairs, "resource").as_str());
    assert_eq!(Some("n"), field(pairs, "name").as_str());
    assert_eq!(Some(0), field(pairs, "error").as_u64());
    assert_eq!(Some(1000), field(pairs, "start").as_i64());
    assert_eq!(Some(500), field(pairs, "duration").as_i64());
}

#[test]
fn v03_exports_the_trace_origin_in_meta() {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    let span = Span {
        dd_origin: "synthetics",
        ..basic_span()
    };
    encoder.put(&[span]).unwrap();

    let payload = decode(&encoder.flush().unwrap());
    let pairs = span_map(&payload, 0, 0);
    assert_eq!(10, pairs.len());

    let meta = field(pairs, "meta").as_map().unwrap();
    assert_eq!(1, meta.len());
    assert_eq!(Some("_dd.origin"), meta[0].0.as_str());
    assert_eq!(Some("synthetics"), meta[0].1.as_str());
}

#[test]
fn v03_absent_text_fields_are_nil() {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    encoder.put(&[Span::<&str>::default()]).unwrap();

    let payload = decode(&encoder.flush().unwrap());
    let pairs = span_map(&payload, 0, 0);
    assert!(field(pairs, "service").is_nil());
    assert!(field(pairs, "resource").is_nil());
    assert!(field(pairs, "name").is_nil());
}

#[test]
fn v03_preserves_numeric_edge_cases() {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    let mut span = basic_span();
    span.trace_id = u64::MAX;
    span.start = i64::MIN;
    span.duration = i64::MAX;
    span.metrics.insert("_sampling_priority_v1", -1.5);
    encoder.put(&[span]).unwrap();

    let payload = decode(&encoder.flush().unwrap());
    let pairs = span_map(&payload, 0, 0);
    assert_eq!(Some(u64::MAX), field(pairs, "trace_id").as_u64());
    assert_eq!(Some(i64::MIN), field(pairs, "start").as_i64());
    assert_eq!(Some(i64::MAX), field(pairs, "duration").as_i64());
    let metrics = field(pairs, "metrics").as_map().unwrap();
    assert_eq!(Some(-1.5), metrics[0].1.as_f64());
}

#[test]
fn v03_keeps_put_order_across_flushes() {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    for span_id in 1..=10u64 {
        let span = Span {
            span_id,
            ..basic_span()
        };
        encoder.put(&[span]).unwrap();
    }

    let payload = decode(&encoder.flush().unwrap());
    let traces = payload.as_array().unwrap();
    assert_eq!(10, traces.len());
    for (i, trace) in traces.iter().enumerate() {
        let pairs = match &trace[0] {
            Value::Map(pairs) => pairs,
            other => panic!("expected a span map, got {other:?}"),
        };
        assert_eq!(Some(i as u64 + 1), field(pairs, "span_id").as_u64());
    }

    // Nothing was accepted since: the next flush has nothing to say.
    assert!(encoder.flush().is_none());
    assert_eq!(0, encoder.len());
}

/// Encoded size of one `basic_span` trace, measured through the public
/// surface: an empty encoder reports size 1 (the smallest array prefix).
fn item_size_v03() -> usize {
    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    encoder.put(&[basic_span()]).unwrap();
    encoder.size() - 1
}

#[test]
fn v03_item_limit_is_exact() {
    let item = item_size_v03();

    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, item).unwrap();
    encoder.put(&[basic_span()]).unwrap();

    let encoder = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, item - 1).unwrap();
    let size = encoder.size();
    match encoder.put(&[basic_span()]) {
        Err(EncodeError::ItemTooLarge(delta)) => assert_eq!(1, delta),
        other => panic!("expected ItemTooLarge, got {other:?}"),
    }
    // The rejected trace left no mark.
    assert_eq!(size, encoder.size());
    assert_eq!(0, encoder.len());
    assert!(encoder.flush().is_none());
}

#[test]
fn v03_buffer_limit_is_exact_and_recoverable() {
    let item = item_size_v03();
    let max_size = 2 * item + 1;

    let encoder = MsgpackEncoderV03::new(max_size, DEFAULT_ITEM_SIZE).unwrap();
    encoder.put(&[basic_span()]).unwrap();
    encoder.put(&[basic_span()]).unwrap();
    assert_eq!(max_size, encoder.size());

    let size = encoder.size();
    match encoder.put(&[basic_span()]) {
        Err(EncodeError::BufferFull(delta)) => assert_eq!(item, delta),
        other => panic!("expected BufferFull, got {other:?}"),
    }
    assert_eq!(size, encoder.size());
    assert_eq!(2, encoder.len());

    // The buffer stays usable: flush the two accepted traces and retry.
    let payload = decode(&encoder.flush().unwrap());
    assert_eq!(2, payload.as_array().unwrap().len());
    encoder.put(&[basic_span()]).unwrap();
}

#[test]
fn v05_interns_strings_in_first_seen_order() {
    let encoder = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    encoder.put(&[basic_span()]).unwrap();

    let payload = decode(&encoder.flush().unwrap());
    let outer = payload.as_array().unwrap();
    assert_eq!(2, outer.len());

    let table: Vec<&str> = outer[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert_eq!(vec!["", "s", "n", "r"], table);

    let span = outer[1][0][0].as_array().unwrap();
    assert_eq!(12, span.len());
    assert_eq!(Some(1), span[0].as_u64()); // service -> "s"
    assert_eq!(Some(2), span[1].as_u64()); // name -> "n"
    assert_eq!(Some(3), span[2].as_u64()); // resource -> "r"
    assert_eq!(Some(1), span[3].as_u64());
    assert_eq!(Some(2), span[4].as_u64());
    assert_eq!(Some(0), span[5].as_u64());
    assert_eq!(Some(1000), span[6].as_i64());
    assert_eq!(Some(500), span[7].as_i64());
    assert_eq!(Some(0), span[8].as_u64());
    assert_eq!(0, span[9].as_map().unwrap().len());
    assert_eq!(0, span[10].as_map().unwrap().len());
    assert_eq!(Some(0), span[11].as_u64()); // type -> ""
}

/// Resolves a V05 payload back into (service, name, resource, meta pairs)
/// per span, checking every emitted id against the shipped table.
fn resolve_v05(payload: &Value) -> Vec<(String, String, String, Vec<(String, String)>)> {
    let outer = payload.as_array().unwrap();
    let table: Vec<String> = outer[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_owned())
        .collect();
    let lookup = |v: &Value| -> String {
        let id = v.as_u64().expect("string ids are unsigned") as usize;
        assert!(id < table.len(), "id {id} missing from the string table");
        table[id].clone()
    };

    let mut spans = Vec::new();
    for trace in outer[1].as_array().unwrap() {
        for span in trace.as_array().unwrap() {
            let span = span.as_array().unwrap();
            let meta = span[9]
                .as_map()
                .unwrap()
                .iter()
                .map(|(k, v)| (lookup(k), lookup(v)))
                .collect();
            for metric_key in span[10].as_map().unwrap() {
                lookup(&metric_key.0);
            }
            lookup(&span[11]);
            spans.push((lookup(&span[0]), lookup(&span[1]), lookup(&span[2]), meta));
        }
    }
    spans
}

#[test]
fn v05_every_id_resolves_through_the_table() -> anyhow::Result<()> {
    let encoder = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE)?;
    let mut span = basic_span();
    span.r#type = "web";
    span.dd_origin = "synthetics";
    span.meta.insert("http.status_code", "200");
    span.meta.insert("http.method", "GET");
    span.metrics.insert("_dd.measured", 1.0);
    encoder.put(&[span.clone(), span])?;

    let payload = decode(&encoder.flush().unwrap());
    let spans = resolve_v05(&payload);
    assert_eq!(2, spans.len());
    for (service, name, resource, meta) in spans {
        assert_eq!("s", service);
        assert_eq!("n", name);
        assert_eq!("r", resource);
        assert_eq!(
            vec![
                ("http.status_code".to_owned(), "200".to_owned()),
                ("http.method".to_owned(), "GET".to_owned()),
                ("_dd.origin".to_owned(), "synthetics".to_owned()),
            ],
            meta
        );
    }
    Ok(())
}

#[test]
fn v05_failed_put_leaves_no_trace_of_itself() {
    // Build a payload that fits exactly two traces, then watch the third
    // put fail and compare against an encoder that never saw it.
    let probe = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    probe.put(&[basic_span()]).unwrap();
    probe.put(&[basic_span()]).unwrap();
    let max_size = probe.size();

    let full = MsgpackEncoderV05::new(max_size, DEFAULT_ITEM_SIZE).unwrap();
    let witness = MsgpackEncoderV05::new(max_size, DEFAULT_ITEM_SIZE).unwrap();
    full.put(&[basic_span()]).unwrap();
    witness.put(&[basic_span()]).unwrap();
    full.put(&[basic_span()]).unwrap();
    witness.put(&[basic_span()]).unwrap();

    // A trace with fresh strings both overflows the buffer and interns
    // table entries that must be rolled back.
    let intruder = Span {
        service: "other-service",
        name: "other-name",
        ..basic_span()
    };
    match full.put(&[intruder]) {
        Err(EncodeError::BufferFull(_)) => {}
        other => panic!("expected BufferFull, got {other:?}"),
    }
    assert_eq!(witness.size(), full.size());
    assert_eq!(witness.len(), full.len());
    assert_eq!(witness.flush().unwrap(), full.flush().unwrap());
}

#[test]
fn v05_reuses_strings_interned_after_a_rollback() {
    let encoder = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, 64).unwrap();
    let rejected: Vec<Span<&str>> = (0..30)
        .map(|i| Span {
            span_id: i,
            service: "checkout",
            ..basic_span()
        })
        .collect();
    match encoder.put(&rejected) {
        Err(EncodeError::ItemTooLarge(_)) => {}
        other => panic!("expected ItemTooLarge, got {other:?}"),
    }

    // The same string shows up again in an accepted trace; its bytes must
    // be present in the shipped table.
    let accepted = Span {
        service: "checkout",
        ..basic_span()
    };
    encoder.put(&[accepted]).unwrap();
    let payload = decode(&encoder.flush().unwrap());
    let spans = resolve_v05(&payload);
    assert_eq!("checkout", spans[0].0);
}

#[test]
fn v05_size_counts_the_string_table() {
    let encoder = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    let before = encoder.size();
    encoder.put(&[basic_span()]).unwrap();
    let after = encoder.size();
    // "s", "n" and "r" are one marker plus one byte each in the table.
    assert!(after >= before + 6, "size {after} ignores the table");

    let payload = encoder.flush().unwrap();
    assert!(payload.len() <= after + 4);
}

#[test]
fn both_encoders_advertise_msgpack() {
    let v03 = MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    let v05 = MsgpackEncoderV05::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap();
    assert_eq!(MSGPACK_CONTENT_TYPE, v03.content_type());
    assert_eq!(MSGPACK_CONTENT_TYPE, v05.content_type());
}

#[test]
fn concurrent_producers_every_put_is_atomic() {
    let encoder = Arc::new(MsgpackEncoderV03::new(DEFAULT_BUFFER_SIZE, DEFAULT_ITEM_SIZE).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|producer| {
            let encoder = Arc::clone(&encoder);
            thread::spawn(move || {
                for i in 0..25u64 {
                    let span = Span {
                        trace_id: producer,
                        span_id: i,
                        service: "load",
                        ..Default::default()
                    };
                    encoder.put(&[span]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(100, encoder.len());
    let payload = decode(&encoder.flush().unwrap());
    let traces = payload.as_array().unwrap();
    assert_eq!(100, traces.len());

    // Per-producer order survives the interleaving.
    for producer in 0..4u64 {
        let ids: Vec<u64> = traces
            .iter()
            .map(|t| {
                let pairs = match &t[0] {
                    Value::Map(pairs) => pairs,
                    other => panic!("expected a span map, got {other:?}"),
                };
                (
                    field(pairs, "trace_id").as_u64().unwrap(),
                    field(pairs, "span_id").as_u64().unwrap(),
                )
            })
            .filter(|(t, _)| *t == producer)
            .map(|(_, s)| s)
            .collect();
        assert_eq!((0..25u64).collect::<Vec<_>>(), ids);
    }
}
