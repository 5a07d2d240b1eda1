use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::audio::AudioFormat;
use crate::messages::request::AssistantToolCall;

/// Canonical streaming response event.
///
/// Adapters translate every upstream event into zero or more of these and
/// enqueue them on the stream's [`AsyncSender`](crate::sender::AsyncSender).
///
/// Ordering guarantees for a well-formed stream:
/// - `GenerationMetrics` with `ttfb` precedes every content event and is
///   emitted exactly once; the `ttlb` variant follows everything.
/// - At most one `AudioFormat` precedes any `AudioChunk`; chunk indices are
///   dense and start at 1.
/// - Partial tool calls for a block are monotone in argument prefix, and
///   the final `ToolCall` follows all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    ContentChunk {
        text: String,
    },
    ReasoningChunk {
        text: String,
    },
    ToolCall(ToolCall),
    PartialToolCall(PartialToolCall),
    StopReason(StopReason),
    ModelUsage(ModelUsage),
    GenerationMetrics(GenerationMetrics),
    AudioFormat(AudioFormat),
    AudioChunk(AudioChunk),
    TurnStart {
        turn_index: u32,
    },
    TurnUpdate {
        turn_index: u32,
        text: String,
    },
    TurnEnd {
        turn_index: u32,
        text: String,
    },
}

/// A complete tool call with strictly parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
    /// Caller annotations copied from the matching tool declaration.
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

impl From<ToolCall> for AssistantToolCall {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
            extra_fields: None,
        }
    }
}

/// A tool call emitted before its argument JSON is complete.
///
/// `arguments` is the accumulated prefix passed through the streaming JSON
/// healer, so it always parses even mid-fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    /// Healed argument JSON text.
    pub arguments: String,
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Unspecified,
    EndTurn,
    MaxTokens,
    ToolCall,
    StopSequence,
    PauseTurn,
    Refusal,
}

/// Per-resource usage with optional post-hoc pricing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub quantity: u64,
    /// Cost in USD, set when the model config carries a pricing table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ResourceUsage {
    pub fn quantity(quantity: u64) -> Self {
        Self { quantity, cost: None }
    }
}

/// Token accounting for a generation.
///
/// `input_token` excludes tokens counted in `input_cache_read_token`, and
/// `output_token` excludes `output_reasoning_token`; the upstream's raw
/// prompt total is `input_token + input_cache_read_token`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub input_token: ResourceUsage,
    #[serde(default)]
    pub input_cache_read_token: ResourceUsage,
    #[serde(default)]
    pub output_token: ResourceUsage,
    #[serde(default)]
    pub output_reasoning_token: ResourceUsage,
}

impl ModelUsage {
    pub fn is_empty(&self) -> bool {
        self.input_token.quantity == 0
            && self.input_cache_read_token.quantity == 0
            && self.output_token.quantity == 0
            && self.output_reasoning_token.quantity == 0
    }

    /// Merge-sum another usage report onto this one.
    pub fn merge(&mut self, other: &ModelUsage) {
        self.input_token.quantity += other.input_token.quantity;
        self.input_cache_read_token.quantity += other.input_cache_read_token.quantity;
        self.output_token.quantity += other.output_token.quantity;
        self.output_reasoning_token.quantity += other.output_reasoning_token.quantity;
    }
}

/// Stream latency metrics.
///
/// Exactly one of the two fields is set per event: `ttfb` on the first
/// non-empty event of the stream, `ttlb` when the upstream loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttlb: Option<Duration>,
}

impl GenerationMetrics {
    pub fn ttfb(elapsed: Duration) -> Self {
        Self {
            ttfb: Some(elapsed),
            ttlb: None,
        }
    }

    pub fn ttlb(elapsed: Duration) -> Self {
        Self {
            ttfb: None,
            ttlb: Some(elapsed),
        }
    }
}

/// One frame of synthesized audio. Indices are dense and start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Unary text-to-text response, accumulated from the canonical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToTextResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Extracted JSON object when `extract_json_object` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub model_usage: ModelUsage,
    pub generation_metrics: GenerationMetrics,
}

/// Unary speech-to-text response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechToTextResponse {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_sums_each_resource() {
        let mut total = ModelUsage {
            input_token: ResourceUsage::quantity(5),
            output_token: ResourceUsage::quantity(2),
            ..Default::default()
        };

        total.merge(&ModelUsage {
            input_token: ResourceUsage::quantity(3),
            input_cache_read_token: ResourceUsage::quantity(7),
            ..Default::default()
        });

        assert_eq!(total.input_token.quantity, 8);
        assert_eq!(total.input_cache_read_token.quantity, 7);
        assert_eq!(total.output_token.quantity, 2);
    }

    #[test]
    fn empty_usage_detection() {
        assert!(ModelUsage::default().is_empty());
        assert!(
            !ModelUsage {
                output_reasoning_token: ResourceUsage::quantity(1),
                ..Default::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn metrics_constructors_set_one_side() {
        let ttfb = GenerationMetrics::ttfb(Duration::from_millis(12));
        assert!(ttfb.ttfb.is_some());
        assert!(ttfb.ttlb.is_none());

        let ttlb = GenerationMetrics::ttlb(Duration::from_millis(40));
        assert!(ttlb.ttfb.is_none());
        assert!(ttlb.ttlb.is_some());
    }
}
