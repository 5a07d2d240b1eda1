//! Reassembly of streamed tool calls.
//!
//! Providers deliver tool-call arguments as indexed, interleaved fragments:
//! Anthropic sends raw JSON deltas per block index, OpenAI-compatible
//! upstreams send fragments keyed by a call index, Google delivers the whole
//! argument map in one structured delta. The accumulator owns the per-stream
//! map from block index to in-flight call, hands out healed
//! [`PartialToolCall`]s while arguments are still streaming, and
//! strict-parses on finalization.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::error::{Error, ErrorInfo, REASON_TOOL_CALL_ARGUMENT_UNMARSHAL};
use crate::messages::response::{PartialToolCall, ToolCall};
use crate::partial_json;

/// Monotonic per-process source of accumulator seeds. Two concurrent
/// streams therefore never synthesize colliding call ids, even for the
/// same block index.
static NEXT_SEED: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Entry {
    id: Option<String>,
    name: Option<String>,
    args: String,
    structured: Option<Map<String, Value>>,
    complete: bool,
}

/// Per-stream tool-call accumulator.
#[derive(Debug)]
pub struct ToolCallAccumulator {
    entries: BTreeMap<u32, Entry>,
    seed: u64,
}

impl Default for ToolCallAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            seed: NEXT_SEED.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Open a new entry at `index` with a known id and name.
    pub fn start(&mut self, index: u32, id: impl Into<String>, name: impl Into<String>) {
        let entry = self.entries.entry(index).or_default();
        entry.id = Some(id.into());
        entry.name = Some(name.into());
    }

    /// Open or update the entry at `index`; id and name may arrive after
    /// the first argument fragment on some upstreams.
    pub fn start_or_update(&mut self, index: u32, id: Option<String>, name: Option<String>) {
        let entry = self.entries.entry(index).or_default();

        if let Some(id) = id {
            entry.id = Some(id);
        }
        if let Some(name) = name {
            entry.name = Some(name);
        }
    }

    /// Append a raw JSON fragment to the entry at `index`.
    ///
    /// Streaming providers emit one active tool call at a time, so a
    /// fragment for `index` marks every other in-flight entry complete.
    pub fn append_args(&mut self, index: u32, fragment: &str) {
        for (other_index, entry) in self.entries.iter_mut() {
            if *other_index != index {
                entry.complete = true;
            }
        }

        self.entries.entry(index).or_default().args.push_str(fragment);
    }

    /// Write a structured argument at a dotted path, for upstreams that
    /// deliver argument maps instead of JSON text. Fails when a path
    /// segment traverses a value already written as a scalar.
    pub fn append_arg(&mut self, index: u32, json_path: &str, value: Value) -> crate::Result<()> {
        for (other_index, entry) in self.entries.iter_mut() {
            if *other_index != index {
                entry.complete = true;
            }
        }

        let entry = self.entries.entry(index).or_default();
        let structured = entry.structured.get_or_insert_with(Map::new);

        let mut segments = json_path.split('.').peekable();
        let mut current = structured;

        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value);
                break;
            }

            current = match current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
            {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::ToolCallArguments(Box::new(ErrorInfo::new(
                        REASON_TOOL_CALL_ARGUMENT_UNMARSHAL,
                        [
                            ("path".to_string(), json_path.to_string()),
                            (
                                "error".to_string(),
                                format!("path segment '{segment}' traverses a non-object value"),
                            ),
                        ],
                    ))));
                }
            };
        }

        Ok(())
    }

    /// Whether any entry is currently open at `index`.
    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    /// Build a healed partial tool call for `index` without mutating the
    /// entry. The id is synthesized when the upstream has not yet sent one.
    pub fn build_partial(&self, index: u32) -> crate::Result<PartialToolCall> {
        let entry = self
            .entries
            .get(&index)
            .ok_or_else(|| Error::Protocol(format!("no tool call open at index {index}")))?;

        let name = entry.name.clone().unwrap_or_default();
        let arguments = match &entry.structured {
            Some(structured) => Value::Object(structured.clone()).to_string(),
            None => partial_json::heal(&entry.args),
        };

        Ok(PartialToolCall {
            id: entry
                .id
                .clone()
                .unwrap_or_else(|| format!("call_{name}_{}_{index}", self.seed)),
            name,
            arguments,
            annotations: BTreeMap::new(),
        })
    }

    /// Finalize the entry at `index` with strict argument parsing and
    /// remove it. Indices are never reused after this returns.
    pub fn build(&mut self, index: u32) -> crate::Result<ToolCall> {
        let entry = self
            .entries
            .remove(&index)
            .ok_or_else(|| Error::Protocol(format!("no tool call open at index {index}")))?;

        let seed = self.seed;
        Self::finalize(entry, index, seed)
    }

    /// Drain every entry previously marked complete by the appearance of a
    /// newer index.
    pub fn build_complete(&mut self) -> crate::Result<Vec<ToolCall>> {
        let indices: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.complete)
            .map(|(index, _)| *index)
            .collect();

        indices.into_iter().map(|index| self.build(index)).collect()
    }

    /// Drain every remaining entry; used at stream EOF.
    pub fn build_remaining(&mut self) -> crate::Result<Vec<ToolCall>> {
        let indices: Vec<u32> = self.entries.keys().copied().collect();

        indices.into_iter().map(|index| self.build(index)).collect()
    }

    fn finalize(entry: Entry, index: u32, seed: u64) -> crate::Result<ToolCall> {
        let name = entry
            .name
            .ok_or_else(|| Error::Protocol(format!("tool call at index {index} closed without a name")))?;

        let arguments = match entry.structured {
            Some(structured) => Value::Object(structured),
            None if entry.args.trim().is_empty() => Value::Object(Map::new()),
            None => match serde_json::from_str::<Value>(&entry.args) {
                Ok(value @ Value::Object(_)) => value,
                Ok(other) => {
                    return Err(Error::ToolCallArguments(Box::new(ErrorInfo::new(
                        REASON_TOOL_CALL_ARGUMENT_UNMARSHAL,
                        [
                            ("tool".to_string(), name.clone()),
                            ("arguments".to_string(), entry.args.clone()),
                            ("error".to_string(), format!("expected JSON object, got {other}")),
                        ],
                    ))));
                }
                Err(e) => {
                    return Err(Error::ToolCallArguments(Box::new(ErrorInfo::new(
                        REASON_TOOL_CALL_ARGUMENT_UNMARSHAL,
                        [
                            ("tool".to_string(), name.clone()),
                            ("arguments".to_string(), entry.args.clone()),
                            ("error".to_string(), e.to_string()),
                        ],
                    ))));
                }
            },
        };

        Ok(ToolCall {
            id: entry.id.unwrap_or_else(|| format!("call_{name}_{seed}_{index}")),
            name,
            arguments,
            annotations: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulates_fragments_into_a_final_call() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_args(0, "{\"a\":");
        acc.append_args(0, "1}");

        let call = acc.build(0).unwrap();

        assert_eq!(call.id, "t1");
        assert_eq!(call.name, "f");
        assert_eq!(call.arguments, json!({"a": 1}));
        assert!(!acc.contains(0));
    }

    #[test]
    fn partials_heal_and_do_not_mutate() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        let initial = acc.build_partial(0).unwrap();
        assert_eq!(initial.arguments, "{}");

        acc.append_args(0, "{\"a\":");
        let mid = acc.build_partial(0).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&mid.arguments).unwrap(), json!({"a": 0}));

        // Idempotent: a second partial sees the same state.
        let again = acc.build_partial(0).unwrap();
        assert_eq!(mid, again);

        acc.append_args(0, "1}");
        let done = acc.build_partial(0).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&done.arguments).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn new_index_marks_previous_entries_complete() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_args(0, "{}");
        acc.start(1, "t2", "g");
        acc.append_args(1, "{\"b\":2}");

        let complete = acc.build_complete().unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].id, "t1");

        let remaining = acc.build_remaining().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "t2");
        assert_eq!(remaining[0].arguments, json!({"b": 2}));
    }

    #[test]
    fn synthesized_ids_are_stable_within_a_stream_and_distinct_across_streams() {
        let mut first = ToolCallAccumulator::new();
        first.start_or_update(0, None, Some("f".into()));

        let partial = first.build_partial(0).unwrap();
        let call = first.build(0).unwrap();
        assert_eq!(partial.id, call.id);

        let mut second = ToolCallAccumulator::new();
        second.start_or_update(0, None, Some("f".into()));
        assert_ne!(second.build_partial(0).unwrap().id, partial.id);
    }

    #[test]
    fn structured_path_writes() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_arg(0, "location.city", json!("Lisbon")).unwrap();
        acc.append_arg(0, "days", json!(3)).unwrap();

        let call = acc.build(0).unwrap();
        assert_eq!(call.arguments, json!({"location": {"city": "Lisbon"}, "days": 3}));
    }

    #[test]
    fn structured_path_through_a_scalar_is_an_error() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_arg(0, "location", json!("Lisbon")).unwrap();

        let err = acc.append_arg(0, "location.city", json!("Lisbon")).unwrap_err();
        match err {
            Error::ToolCallArguments(info) => {
                assert_eq!(info.reason, REASON_TOOL_CALL_ARGUMENT_UNMARSHAL);
                assert_eq!(info.metadata.get("path").unwrap(), "location.city");
            }
            other => panic!("expected ToolCallArguments, got {other:?}"),
        }

        // The entry survives with its last consistent state.
        let call = acc.build(0).unwrap();
        assert_eq!(call.arguments, json!({"location": "Lisbon"}));
    }

    #[test]
    fn malformed_arguments_carry_error_info() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_args(0, "{\"a\": nope}");

        let err = acc.build(0).unwrap_err();
        match err {
            Error::ToolCallArguments(info) => {
                assert_eq!(info.reason, REASON_TOOL_CALL_ARGUMENT_UNMARSHAL);
                assert_eq!(info.metadata.get("arguments").unwrap(), "{\"a\": nope}");
            }
            other => panic!("expected ToolCallArguments, got {other:?}"),
        }
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        acc.append_args(0, "[1,2]");

        assert!(matches!(acc.build(0), Err(Error::ToolCallArguments(_))));
    }

    #[test]
    fn empty_arguments_finalize_to_empty_object() {
        let mut acc = ToolCallAccumulator::new();

        acc.start(0, "t1", "f");
        let call = acc.build(0).unwrap();

        assert_eq!(call.arguments, json!({}));
    }
}
