use serde_json::{Map, Value};

/// Best-effort parse of a possibly-truncated JSON document.
///
/// Used to turn an in-progress tool-call argument string into a renderable
/// value while a stream is still delivering it. Never errors: empty or
/// unparseable input yields an empty object, a truncated string value keeps
/// whatever text arrived so far, and a fully valid document parses normally.
pub fn parse_partial_json(input: &str) -> Value {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return value;
    }

    let mut scanner = Scanner::new(trimmed);
    scanner.parse_value().unwrap_or(Value::Object(Map::new()))
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { bytes: input.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            b'{' => self.parse_object(),
            b'[' => self.parse_array(),
            b'"' => self.parse_string().map(Value::String),
            b't' | b'f' => self.parse_bool(),
            b'n' => self.parse_null(),
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => None,
        }
    }

    fn parse_object(&mut self) -> Option<Value> {
        self.pos += 1; // consume '{'
        let mut map = Map::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Some(Value::Object(map)),
                Some(b'}') => {
                    self.pos += 1;
                    return Some(Value::Object(map));
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(b'"') => {
                    let key_start = self.pos;
                    let Some(key) = self.parse_string() else {
                        // truncated mid-key: nothing more to add
                        self.pos = key_start;
                        return Some(Value::Object(map));
                    };
                    self.skip_ws();
                    if self.peek() != Some(b':') {
                        // key with no value yet
                        return Some(Value::Object(map));
                    }
                    self.pos += 1; // consume ':'
                    match self.parse_value() {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => return Some(Value::Object(map)),
                    }
                }
                _ => return Some(Value::Object(map)),
            }
        }
    }

    fn parse_array(&mut self) -> Option<Value> {
        self.pos += 1; // consume '['
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Some(Value::Array(items)),
                Some(b']') => {
                    self.pos += 1;
                    return Some(Value::Array(items));
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => match self.parse_value() {
                    Some(value) => items.push(value),
                    None => return Some(Value::Array(items)),
                },
            }
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        if self.peek() != Some(b'"') {
            return None;
        }
        self.pos += 1;

        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Some(out), // truncated, return what we have
                Some(b'"') => {
                    self.pos += 1;
                    return Some(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Some(out),
                        Some(b'n') => {
                            out.push('\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            out.push('\t');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            out.push('\r');
                            self.pos += 1;
                        }
                        Some(b'"') => {
                            out.push('"');
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            out.push('\\');
                            self.pos += 1;
                        }
                        Some(b'u') => {
                            // escaped unicode sequence: need 4 hex digits, else truncated
                            if self.pos + 5 > self.bytes.len() {
                                return Some(out);
                            }
                            let hex = std::str::from_utf8(&self.bytes[self.pos + 1..self.pos + 5]).ok()?;
                            if let Ok(code) = u32::from_str_radix(hex, 16) {
                                if let Some(c) = char::from_u32(code) {
                                    out.push(c);
                                }
                            }
                            self.pos += 5;
                        }
                        Some(other) => {
                            out.push(other as char);
                            self.pos += 1;
                        }
                    }
                }
                Some(_) => {
                    // advance by full utf8 char to avoid splitting multi-byte sequences
                    let rest = std::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("");
                    if let Some(c) = rest.chars().next() {
                        out.push(c);
                        self.pos += c.len_utf8();
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }
    }

    fn parse_bool(&mut self) -> Option<Value> {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(b"true") {
            self.pos += 4;
            Some(Value::Bool(true))
        } else if rest.starts_with(b"false") {
            self.pos += 5;
            Some(Value::Bool(false))
        } else {
            None
        }
    }

    fn parse_null(&mut self) -> Option<Value> {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(b"null") {
            self.pos += 4;
            Some(Value::Null)
        } else {
            None
        }
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')) {
            self.pos += 1;
        }
        let slice = std::str::from_utf8(&self.bytes[start..self.pos]).ok()?;
        // a bare "-" or a dangling exponent marker is a truncated number: drop it
        // entirely rather than returning a bogus value.
        slice.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_input_yields_empty_object() {
        assert_eq!(parse_partial_json(""), json!({}));
        assert_eq!(parse_partial_json("   "), json!({}));
    }

    #[test]
    fn complete_json_parses_normally() {
        assert_eq!(parse_partial_json(r#"{"a":1,"b":"x"}"#), json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn truncated_string_value_keeps_partial_text() {
        let partial = r#"{"query":"vitest test"#;
        assert_eq!(parse_partial_json(partial), json!({"query": "vitest test"}));
    }

    #[test]
    fn truncated_mid_key_drops_incomplete_entry() {
        let partial = r#"{"query":"done","nex"#;
        assert_eq!(parse_partial_json(partial), json!({"query": "done"}));
    }

    #[test]
    fn junk_input_yields_empty_object() {
        assert_eq!(parse_partial_json("not json at all"), json!({}));
    }

    #[test]
    fn monotone_over_streaming_prefixes() {
        let full = r#"{"query":"vitest testing"}"#;
        let mut previous_keys: Vec<String> = Vec::new();
        for end in 1..=full.len() {
            if !full.is_char_boundary(end) {
                continue;
            }
            let prefix = &full[..end];
            let value = parse_partial_json(prefix);
            if let Value::Object(map) = &value {
                let keys: Vec<String> = map.keys().cloned().collect();
                // once a key is fully captured with a complete value, it must
                // never disappear in a later, longer prefix.
                for k in &previous_keys {
                    if full[..end].contains(&format!("\"{k}\":")) && map.get(k).is_some() {
                        assert!(keys.contains(k));
                    }
                }
            }
        }
    }
}
