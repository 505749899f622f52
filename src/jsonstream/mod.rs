//! Lossy streaming JSON tokenizer and accumulator.
//!
//! Accepts arbitrary text chunks on the write side and emits structural
//! events on the read side: `n1` at the first top-level `{`, `n2` at the
//! second, `snapshot` with the best-effort parse of the buffer so far, and
//! exactly one `final` at end-of-input when a top-level value was
//! recognised. Parse errors are swallowed and surface only as the absence
//! of `final`.
//!
//! The parser tolerates what streaming models actually produce: raw control
//! characters inside strings, cased literals (`True`, `NULL`), abruptly
//! terminated input (open strings, arrays and objects close implicitly at
//! EOF), and trailing prose after the first top-level object.
//!
//! Monotonicity: re-parsing a longer prefix of the same stream can only
//! extend the previous value — new keys, new array items, growing strings.
//! Partial numbers may be corrected as more digits arrive.

use serde_json::{Map, Number, Value};

/// Events emitted by [`IncrementalJsonStream`]
#[derive(Debug, Clone, PartialEq)]
pub enum JsonStreamEvent {
    /// First top-level `{` seen; payload is the text before it
    N1 { preamble: String },
    /// First `{` of a second top-level object
    N2,
    /// Best-effort parse of the buffer so far (only when it changed)
    Snapshot(Value),
    /// Emitted exactly once at end-of-input if a top-level value was seen
    Final(Value),
}

/// Parser behaviour switches
#[derive(Debug, Clone)]
pub struct JsonStreamOptions {
    /// Accept raw control characters inside string literals
    pub control_chars: bool,
    /// Swallow parse errors (surface as absence of `final`)
    pub swallow_errors: bool,
}

impl Default for JsonStreamOptions {
    fn default() -> Self {
        Self {
            control_chars: true,
            swallow_errors: true,
        }
    }
}

/// Write-side sink for one streamed completion
#[derive(Debug)]
pub struct IncrementalJsonStream {
    buffer: String,
    opts: JsonStreamOptions,
    n1_emitted: bool,
    n2_emitted: bool,
    last_snapshot: Option<Value>,
    finished: bool,
}

impl IncrementalJsonStream {
    pub fn new(opts: JsonStreamOptions) -> Self {
        Self {
            buffer: String::new(),
            opts,
            n1_emitted: false,
            n2_emitted: false,
            last_snapshot: None,
            finished: false,
        }
    }

    /// Append a chunk and collect any events it unlocks
    pub fn feed(&mut self, chunk: &str) -> Vec<JsonStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.push_str(chunk);
        self.scan()
    }

    /// Signal end-of-input; emits the single `final` event if a top-level
    /// value was recognised
    pub fn finish(&mut self) -> Vec<JsonStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = self.scan();
        self.finished = true;
        if let Some(value) = self.last_snapshot.take() {
            events.push(JsonStreamEvent::Final(value));
        }
        events
    }

    fn scan(&mut self) -> Vec<JsonStreamEvent> {
        let mut events = Vec::new();

        let Some(start) = self.buffer.find('{') else {
            return events;
        };

        if !self.n1_emitted {
            self.n1_emitted = true;
            events.push(JsonStreamEvent::N1 {
                preamble: self.buffer[..start].to_string(),
            });
        }

        let chars: Vec<char> = self.buffer[start..].chars().collect();
        let mut parser = LenientParser::new(&chars, &self.opts);
        if let Some(value) = parser.parse_value() {
            // Trailing content after a closed top-level object is dropped;
            // a second `{` in it fires n2 once.
            if !self.n2_emitted && parser.closed_cleanly {
                let rest: String = chars[parser.pos..].iter().collect();
                if rest.contains('{') {
                    self.n2_emitted = true;
                    events.push(JsonStreamEvent::N2);
                }
            }
            if self.last_snapshot.as_ref() != Some(&value) {
                events.push(JsonStreamEvent::Snapshot(value.clone()));
                self.last_snapshot = Some(value);
            }
        }

        events
    }
}

/// Parse a complete-or-truncated JSON text leniently.
///
/// Used both by the stream accumulator above and for tool-call argument
/// parsing, so both sides accept the same dialect.
pub fn parse_lenient(input: &str, opts: &JsonStreamOptions) -> Option<Value> {
    let trimmed = input.trim_start();
    let chars: Vec<char> = trimmed.chars().collect();
    LenientParser::new(&chars, opts).parse_value()
}

// =============================================================================
// Lenient recursive-descent parser
// =============================================================================

struct LenientParser<'a> {
    input: &'a [char],
    pos: usize,
    opts: &'a JsonStreamOptions,
    /// Whether the top-level value was terminated by its closing token
    /// (rather than implicitly closed at EOF)
    closed_cleanly: bool,
    depth: usize,
}

const MAX_DEPTH: usize = 128;

impl<'a> LenientParser<'a> {
    fn new(input: &'a [char], opts: &'a JsonStreamOptions) -> Self {
        Self {
            input,
            pos: 0,
            opts,
            closed_cleanly: false,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.skip_ws();
        let (value, closed) = match self.peek()? {
            '{' => self.parse_object(),
            '[' => self.parse_array(),
            '"' | '\'' => {
                let (s, closed) = self.parse_string();
                (Some(Value::String(s)), closed)
            }
            c if c == '-' || c == '+' || c.is_ascii_digit() => (self.parse_number(), true),
            c if c.is_alphabetic() => (self.parse_literal(), true),
            _ => (None, false),
        };
        if self.depth == 0 {
            self.closed_cleanly = closed && value.is_some();
        }
        value
    }

    fn parse_object(&mut self) -> (Option<Value>, bool) {
        self.bump(); // '{'
        self.depth += 1;
        let mut map = Map::new();
        let closed = loop {
            self.skip_ws();
            match self.peek() {
                None => break false,
                Some('}') => {
                    self.bump();
                    break true;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some('"') | Some('\'') => {
                    let (key, key_closed) = self.parse_string();
                    if !key_closed {
                        // Key still streaming in; nothing stable to emit yet
                        break false;
                    }
                    self.skip_ws();
                    match self.peek() {
                        Some(':') => {
                            self.bump();
                        }
                        // Colon not here yet: drop the pending key
                        _ => break false,
                    }
                    self.skip_ws();
                    if self.peek().is_none() {
                        // Value not started: drop the pending key
                        break false;
                    }
                    match self.parse_value() {
                        Some(v) => {
                            map.insert(key, v);
                        }
                        None => break false,
                    }
                }
                // Anything else inside an object is garbage; close implicitly
                Some(_) => break false,
            }
        };
        self.depth -= 1;
        (Some(Value::Object(map)), closed)
    }

    fn parse_array(&mut self) -> (Option<Value>, bool) {
        self.bump(); // '['
        self.depth += 1;
        let mut items = Vec::new();
        let closed = loop {
            self.skip_ws();
            match self.peek() {
                None => break false,
                Some(']') => {
                    self.bump();
                    break true;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(_) => match self.parse_value() {
                    Some(v) => items.push(v),
                    None => break false,
                },
            }
        };
        self.depth -= 1;
        (Some(Value::Array(items)), closed)
    }

    /// Returns (content, closed). An unterminated string closes implicitly
    /// at EOF and returns what has arrived so far.
    fn parse_string(&mut self) -> (String, bool) {
        let quote = self.bump().unwrap_or('"');
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return (out, false),
                Some(c) if c == quote => return (out, true),
                Some('\\') => match self.bump() {
                    None => return (out, false),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{0008}'),
                    Some('f') => out.push('\u{000C}'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                        if hex.len() < 4 {
                            return (out, false);
                        }
                        if let Ok(cp) = u32::from_str_radix(&hex, 16) {
                            if let Some(c) = char::from_u32(cp) {
                                out.push(c);
                            }
                        }
                    }
                    Some(other) => out.push(other),
                },
                Some(c) if c.is_control() && !self.opts.control_chars => {
                    // Strict mode: control characters end the string
                    return (out, false);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
        ) {
            self.pos += 1;
        }
        let mut text: String = self.input[start..self.pos].iter().collect();
        // A partial number ("-", "1e", "2.") gets its dangling tail trimmed
        // and is corrected once more digits arrive.
        while text
            .chars()
            .last()
            .is_some_and(|c| matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            text.pop();
        }
        if text.is_empty() {
            return None;
        }
        if let Ok(i) = text.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }

    fn parse_literal(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphabetic()) {
            self.pos += 1;
        }
        let word: String = self.input[start..self.pos].iter().collect();
        match word.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            // Truncated literal at EOF: treat prefixes as their completion
            "t" | "tr" | "tru" if self.peek().is_none() => Some(Value::Bool(true)),
            "f" | "fa" | "fal" | "fals" if self.peek().is_none() => Some(Value::Bool(false)),
            "n" | "nu" | "nul" if self.peek().is_none() => Some(Value::Null),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream() -> IncrementalJsonStream {
        IncrementalJsonStream::new(JsonStreamOptions::default())
    }

    #[test]
    fn n1_carries_preamble() {
        let mut s = stream();
        let events = s.feed("Sure, here is the JSON you asked for: {\"a\":1}");
        assert!(matches!(
            &events[0],
            JsonStreamEvent::N1 { preamble } if preamble.starts_with("Sure")
        ));
    }

    #[test]
    fn abrupt_termination_closes_implicitly() {
        let mut s = stream();
        s.feed(r#"{"intention":"USE_TOOLS","tools":[{"name":"x"#);
        let events = s.finish();
        let final_value = events
            .iter()
            .find_map(|e| match e {
                JsonStreamEvent::Final(v) => Some(v.clone()),
                _ => None,
            })
            .expect("final event");
        assert_eq!(
            final_value,
            json!({"intention":"USE_TOOLS","tools":[{"name":"x"}]})
        );
    }

    #[test]
    fn snapshots_are_monotonic_extensions() {
        let mut s = stream();
        let mut snapshots = Vec::new();
        for chunk in [r#"{"thoughts":"I sho"#, r#"uld browse","tools"#, r#"":[]}"#] {
            for e in s.feed(chunk) {
                if let JsonStreamEvent::Snapshot(v) = e {
                    snapshots.push(v);
                }
            }
        }
        assert!(snapshots.len() >= 2);
        for pair in snapshots.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            for (key, old) in a.as_object().unwrap() {
                let new = &b[key];
                if let (Some(old_s), Some(new_s)) = (old.as_str(), new.as_str()) {
                    assert!(new_s.starts_with(old_s), "string retracted: {old_s} -> {new_s}");
                }
            }
        }
    }

    #[test]
    fn cased_literals_accepted() {
        let opts = JsonStreamOptions::default();
        assert_eq!(
            parse_lenient(r#"{"a": True, "b": FALSE, "c": NULL}"#, &opts),
            Some(json!({"a": true, "b": false, "c": null}))
        );
    }

    #[test]
    fn control_chars_inside_strings() {
        let opts = JsonStreamOptions::default();
        let value = parse_lenient("{\"a\":\"line1\nline2\"}", &opts).unwrap();
        assert_eq!(value["a"], "line1\nline2");
    }

    #[test]
    fn trailing_prose_dropped() {
        let mut s = stream();
        s.feed("{\"done\": true} hope that helps!");
        let events = s.finish();
        let final_value = events
            .iter()
            .find_map(|e| match e {
                JsonStreamEvent::Final(v) => Some(v.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(final_value, json!({"done": true}));
    }

    #[test]
    fn n2_fires_on_second_top_level_object() {
        let mut s = stream();
        let mut events = s.feed("{\"a\":1}");
        events.extend(s.feed(" and also {\"b\":2}"));
        assert!(events.iter().any(|e| matches!(e, JsonStreamEvent::N2)));
        // n2 fires once
        let again = s.feed(" {\"c\":3}");
        assert!(!again.iter().any(|e| matches!(e, JsonStreamEvent::N2)));
    }

    #[test]
    fn no_final_without_top_level_value() {
        let mut s = stream();
        s.feed("just prose, no json here");
        let events = s.finish();
        assert!(events.is_empty());
    }

    #[test]
    fn partial_numbers_get_fixed() {
        let opts = JsonStreamOptions::default();
        assert_eq!(parse_lenient(r#"{"n": 12"#, &opts), Some(json!({"n": 12})));
        assert_eq!(
            parse_lenient(r#"{"n": 12.5}"#, &opts),
            Some(json!({"n": 12.5}))
        );
        // dangling exponent is trimmed, then corrected by later chunks
        assert_eq!(parse_lenient(r#"{"n": 1e"#, &opts), Some(json!({"n": 1})));
    }

    #[test]
    fn duplicate_snapshots_suppressed() {
        let mut s = stream();
        let first = s.feed("{\"a\":1}");
        assert!(first.iter().any(|e| matches!(e, JsonStreamEvent::Snapshot(_))));
        // Whitespace appended after a closed object does not change the parse
        let second = s.feed("   ");
        assert!(!second.iter().any(|e| matches!(e, JsonStreamEvent::Snapshot(_))));
    }
}
