//! Behavioural tests for the lossy streaming JSON accumulator.

use pagereader::{IncrementalJsonStream, JsonStreamEvent, JsonStreamOptions};
use serde_json::{json, Value};

fn stream() -> IncrementalJsonStream {
    IncrementalJsonStream::new(JsonStreamOptions::default())
}

fn final_of(events: &[JsonStreamEvent]) -> Option<Value> {
    events.iter().find_map(|e| match e {
        JsonStreamEvent::Final(v) => Some(v.clone()),
        _ => None,
    })
}

/// Feed a document one character at a time and collect everything.
fn feed_char_by_char(input: &str) -> Vec<JsonStreamEvent> {
    let mut s = stream();
    let mut events = Vec::new();
    for c in input.chars() {
        events.extend(s.feed(&c.to_string()));
    }
    events.extend(s.finish());
    events
}

#[test]
fn abruptly_terminated_envelope_closes_at_eof() {
    let mut s = stream();
    s.feed("{\"intention\":\"USE_TOOLS\",\"tools\":[{\"name\":\"x\"");
    let events = s.finish();
    assert_eq!(
        final_of(&events).unwrap(),
        json!({"intention": "USE_TOOLS", "tools": [{"name": "x"}]})
    );
}

#[test]
fn exactly_one_final_per_stream() {
    let mut s = stream();
    s.feed("{\"a\": 1}");
    let finals: usize = s
        .finish()
        .iter()
        .filter(|e| matches!(e, JsonStreamEvent::Final(_)))
        .count();
    assert_eq!(finals, 1);
    // finish is idempotent
    assert!(s.finish().is_empty());
    assert!(s.feed("{\"b\": 2}").is_empty());
}

#[test]
fn n1_precedes_every_snapshot() {
    let events = feed_char_by_char("The answer is: {\"answer\": \"yes\"}");
    let n1_pos = events
        .iter()
        .position(|e| matches!(e, JsonStreamEvent::N1 { .. }))
        .expect("n1 emitted");
    let first_snapshot = events
        .iter()
        .position(|e| matches!(e, JsonStreamEvent::Snapshot(_)))
        .expect("snapshot emitted");
    assert!(n1_pos < first_snapshot);

    match &events[n1_pos] {
        JsonStreamEvent::N1 { preamble } => assert_eq!(preamble, "The answer is: "),
        _ => unreachable!(),
    }
}

#[test]
fn snapshots_only_extend_prior_snapshots() {
    let doc = r#"{"intention":"USE_TOOLS","thoughts":"need the page content first","tools":[{"name":"browse","arguments":{"url":"https://example.com"},"id":"T1"}]}"#;
    let events = feed_char_by_char(doc);

    let snapshots: Vec<&Value> = events
        .iter()
        .filter_map(|e| match e {
            JsonStreamEvent::Snapshot(v) => Some(v),
            _ => None,
        })
        .collect();
    assert!(snapshots.len() > 3, "char-by-char feeding produces many snapshots");

    for pair in snapshots.windows(2) {
        assert_extends(pair[0], pair[1]);
    }

    assert_eq!(final_of(&events).unwrap(), serde_json::from_str::<Value>(doc).unwrap());
}

/// later must be a structural extension of earlier
fn assert_extends(earlier: &Value, later: &Value) {
    match (earlier, later) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let new = b
                    .get(key)
                    .unwrap_or_else(|| panic!("key {key} retracted"));
                assert_extends(old, new);
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            assert!(b.len() >= a.len(), "array shrank");
            // all but the still-streaming last element must extend
            for (old, new) in a.iter().zip(b.iter()) {
                assert_extends(old, new);
            }
        }
        (Value::String(a), Value::String(b)) => {
            assert!(b.starts_with(a.as_str()), "string retracted: {a:?} -> {b:?}");
        }
        // numbers may be corrected as digits arrive
        (Value::Number(_), Value::Number(_)) => {}
        (a, b) => assert_eq!(a, b, "scalar changed shape"),
    }
}

#[test]
fn cased_literals_and_control_chars() {
    let mut s = stream();
    s.feed("{\"ok\": True, \"note\": \"line1\nline2\", \"missing\": NULL}");
    let value = final_of(&s.finish()).unwrap();
    assert_eq!(value["ok"], json!(true));
    assert_eq!(value["note"], json!("line1\nline2"));
    assert_eq!(value["missing"], Value::Null);
}

#[test]
fn trailing_prose_after_object_is_dropped() {
    let mut s = stream();
    s.feed("{\"result\": 42} I hope that helps! Let me know if you need more.");
    assert_eq!(final_of(&s.finish()).unwrap(), json!({"result": 42}));
}

#[test]
fn second_object_fires_n2_once() {
    let mut s = stream();
    let mut events = s.feed("{\"a\": 1} some text {\"b\": 2} and {\"c\": 3}");
    events.extend(s.finish());
    let n2_count = events
        .iter()
        .filter(|e| matches!(e, JsonStreamEvent::N2))
        .count();
    assert_eq!(n2_count, 1);
}

#[test]
fn prose_only_stream_has_no_final() {
    let mut s = stream();
    s.feed("I cannot answer that question.");
    assert!(final_of(&s.finish()).is_none());
}

#[test]
fn nested_structures_survive_truncation_anywhere() {
    let doc = r#"{"a": {"b": [1, 2, {"c": "deep"}]}, "d": false}"#;
    // Truncate at every prefix length; the parser must never panic and the
    // result, when present, must be an object.
    for cut in 1..=doc.len() {
        if !doc.is_char_boundary(cut) {
            continue;
        }
        let mut s = stream();
        s.feed(&doc[..cut]);
        if let Some(v) = final_of(&s.finish()) {
            assert!(v.is_object());
        }
    }
}
