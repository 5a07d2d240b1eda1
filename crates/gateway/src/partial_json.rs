//! Streaming JSON healing.
//!
//! Tool-call arguments arrive as JSON fragments; partial-tool-call events
//! must still carry parseable text. [`heal`] scans the accumulated prefix
//! with a small state machine and appends the closers (`"`, `}`, `]`) for
//! every still-open construct, in reverse nesting order. Dangling members
//! are completed with the filler `0`, truncated keywords are finished, and
//! a trailing comma is dropped.
//!
//! This is the only place in the gateway where partial JSON is acceptable.

#[derive(Debug, Clone, Copy, PartialEq)]
enum ObjExpect {
    KeyOrEnd,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArrExpect {
    ValueOrEnd,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Object(ObjExpect),
    Array(ArrExpect),
}

fn value_end(stack: &mut [Frame]) {
    match stack.last_mut() {
        Some(Frame::Object(state)) => *state = ObjExpect::CommaOrEnd,
        Some(Frame::Array(state)) => *state = ArrExpect::CommaOrEnd,
        None => {}
    }
}

/// Heal a JSON prefix into parseable text.
///
/// An empty or all-whitespace prefix heals to `"{}"`.
pub fn heal(input: &str) -> String {
    if input.trim().is_empty() {
        return "{}".to_string();
    }

    let bytes = input.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut out = input.to_string();

    // Set when input ends inside a string: (string was an object key, escape pending).
    let mut unterminated_string: Option<(bool, bool)> = None;
    // Set when input ends inside a bare literal (number or keyword).
    let mut partial_literal: Option<&str> = None;

    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'{' => {
                stack.push(Frame::Object(ObjExpect::KeyOrEnd));
                i += 1;
            }
            b'[' => {
                stack.push(Frame::Array(ArrExpect::ValueOrEnd));
                i += 1;
            }
            b'}' | b']' => {
                stack.pop();
                value_end(&mut stack);
                i += 1;
            }
            b':' => {
                if let Some(Frame::Object(state)) = stack.last_mut() {
                    *state = ObjExpect::Value;
                }
                i += 1;
            }
            b',' => {
                match stack.last_mut() {
                    Some(Frame::Object(state)) => *state = ObjExpect::KeyOrEnd,
                    Some(Frame::Array(state)) => *state = ArrExpect::Value,
                    None => {}
                }
                i += 1;
            }
            b'"' => {
                let is_key = matches!(stack.last(), Some(Frame::Object(ObjExpect::KeyOrEnd)));
                i += 1;

                let mut escape = false;
                let mut closed = false;

                while i < bytes.len() {
                    let c = bytes[i];
                    i += 1;

                    if escape {
                        escape = false;
                    } else if c == b'\\' {
                        escape = true;
                    } else if c == b'"' {
                        closed = true;
                        break;
                    }
                }

                if closed {
                    if is_key {
                        if let Some(Frame::Object(state)) = stack.last_mut() {
                            *state = ObjExpect::Colon;
                        }
                    } else {
                        value_end(&mut stack);
                    }
                } else {
                    unterminated_string = Some((is_key, escape));
                }
            }
            _ => {
                let start = i;

                while i < bytes.len()
                    && !matches!(bytes[i], b',' | b'}' | b']' | b':' | b' ' | b'\t' | b'\n' | b'\r')
                {
                    i += 1;
                }

                if i < bytes.len() {
                    value_end(&mut stack);
                } else {
                    partial_literal = Some(&input[start..]);
                }
            }
        }
    }

    if let Some((is_key, escape)) = unterminated_string {
        if escape {
            // Complete the dangling escape as a literal backslash.
            out.push('\\');
        }
        out.push('"');

        if is_key {
            out.push_str(":0");
        }
        value_end(&mut stack);
    } else if let Some(token) = partial_literal {
        for keyword in ["true", "false", "null"] {
            if keyword.starts_with(token) && token.len() < keyword.len() {
                out.push_str(&keyword[token.len()..]);
                break;
            }
        }

        if matches!(token.as_bytes().last(), Some(b'-' | b'+' | b'.' | b'e' | b'E')) {
            out.push('0');
        }
        value_end(&mut stack);
    } else {
        // A dangling comma would make the appended closer invalid.
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        if out.ends_with(',') {
            out.pop();
        }
    }

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Object(state) => {
                match state {
                    ObjExpect::Colon => out.push_str(":0"),
                    ObjExpect::Value => out.push('0'),
                    ObjExpect::KeyOrEnd | ObjExpect::CommaOrEnd => {}
                }
                out.push('}');
            }
            Frame::Array(_) => out.push(']'),
        }

        // Outer frames were mid-value; the closer completed that value.
        value_end(&mut stack);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn healed(input: &str) -> Value {
        let text = heal(input);
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("heal({input:?}) = {text:?} does not parse: {e}"))
    }

    #[test]
    fn empty_heals_to_empty_object() {
        assert_eq!(heal(""), "{}");
        assert_eq!(heal("   "), "{}");
    }

    #[test]
    fn complete_json_is_untouched() {
        assert_eq!(heal(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(heal(r#"[1,2,3]"#), r#"[1,2,3]"#);
    }

    #[test]
    fn dangling_value_uses_zero_filler() {
        assert_eq!(healed(r#"{"a":"#), json!({"a": 0}));
        assert_eq!(healed(r#"{"a""#), json!({"a": 0}));
        assert_eq!(healed(r#"{"a"#), json!({"a": 0}));
    }

    #[test]
    fn unterminated_strings_are_closed() {
        assert_eq!(healed(r#"{"a":"he"#), json!({"a": "he"}));
        assert_eq!(healed(r#"{"a":"x\"#), json!({"a": "x\\"}));
        assert_eq!(healed(r#"{"a":"say \"hi"#), json!({"a": "say \"hi"}));
    }

    #[test]
    fn trailing_commas_are_dropped() {
        assert_eq!(healed(r#"{"a":1,"#), json!({"a": 1}));
        assert_eq!(healed(r#"[1,2,"#), json!([1, 2]));
        assert_eq!(healed("[1,2,  "), json!([1, 2]));
    }

    #[test]
    fn keywords_and_numbers_are_completed() {
        assert_eq!(healed(r#"{"a":tr"#), json!({"a": true}));
        assert_eq!(healed(r#"{"a":fal"#), json!({"a": false}));
        assert_eq!(healed(r#"{"a":n"#), json!({"a": null}));
        assert_eq!(heal(r#"{"a":-"#), r#"{"a":-0}"#);
        assert_eq!(healed(r#"{"a":1."#), json!({"a": 1.0}));
        assert_eq!(healed(r#"{"a":2e"#), json!({"a": 2e0}));
        assert_eq!(healed(r#"{"a":12"#), json!({"a": 12}));
    }

    #[test]
    fn nested_constructs_close_in_reverse_order() {
        assert_eq!(healed(r#"{"a":[{"b":"#), json!({"a": [{"b": 0}]}));
        assert_eq!(healed(r#"{"a":{"b":[1"#), json!({"a": {"b": [1]}}));
        assert_eq!(heal(r#"{"a":[{"b":"#), r#"{"a":[{"b":0}]}"#);
    }

    #[test]
    fn every_prefix_of_a_real_payload_heals_to_valid_json() {
        let full = r#"{"city":"Lisbon","days":3,"units":"metric","flags":[true,false,null],"detail":{"wind":true,"temps":[12.5,-3,2e2]}}"#;

        for end in 0..=full.len() {
            healed(&full[..end]);
        }
    }

    #[test]
    fn fragment_sequence_heals_monotonically() {
        // Fragments "{\"a\":" then "1}" as an Anthropic stream would send them.
        assert_eq!(healed(r#"{"a":"#), json!({"a": 0}));
        assert_eq!(healed(r#"{"a":1}"#), json!({"a": 1}));
    }
}
