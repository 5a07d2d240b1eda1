//! Anthropic SSE events → canonical events.

use serde::Deserialize;

use crate::error::Error;
use crate::messages::response::StopReason;

/// The Messages API streaming event union.
///
/// Event flow for a typical stream:
/// 1. `message_start` — input-token accounting
/// 2. `content_block_start` — text / thinking / tool_use at a block index
/// 3. `content_block_delta` — text, thinking or input-JSON fragments
/// 4. `content_block_stop` — block complete
/// 5. `message_delta` — output tokens + stop reason
/// 6. `message_stop` — end of stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicStreamEvent {
    MessageStart { message: MessageStart },
    ContentBlockStart { index: u32, content_block: AnthropicContentBlock },
    ContentBlockDelta { index: u32, delta: AnthropicBlockDelta },
    ContentBlockStop { index: u32 },
    MessageDelta {
        delta: MessageDeltaData,
        #[serde(default)]
        usage: DeltaUsage,
    },
    MessageStop,
    Ping,
    Error { error: AnthropicStreamError },
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageStart {
    pub usage: StartUsage,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct StartUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct DeltaUsage {
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicContentBlock {
    Text {
        #[serde(default)]
        #[allow(dead_code)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        #[allow(dead_code)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    /// Signature deltas close out thinking blocks; nothing to forward.
    SignatureDelta {
        #[serde(default)]
        #[allow(dead_code)]
        signature: String,
    },
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageDeltaData {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnthropicStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Total stop-reason table; a miss is a protocol violation.
pub(super) fn map_stop_reason(reason: &str) -> crate::Result<StopReason> {
    match reason {
        "end_turn" => Ok(StopReason::EndTurn),
        "max_tokens" => Ok(StopReason::MaxTokens),
        "tool_use" => Ok(StopReason::ToolCall),
        "stop_sequence" => Ok(StopReason::StopSequence),
        "pause_turn" => Ok(StopReason::PauseTurn),
        "refusal" => Ok(StopReason::Refusal),
        other => Err(Error::Protocol(format!("unknown stop reason '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_event_union() {
        let event: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":7,"cache_read_input_tokens":2}}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            AnthropicStreamEvent::MessageStart { message } if message.usage.input_tokens == 7
        ));

        let event: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"f"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            AnthropicStreamEvent::ContentBlockStart {
                index: 0,
                content_block: AnthropicContentBlock::ToolUse { .. }
            }
        ));

        let event: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicBlockDelta::InputJsonDelta { .. },
                ..
            }
        ));
    }

    #[test]
    fn stop_reason_table_is_total() {
        assert_eq!(map_stop_reason("end_turn").unwrap(), StopReason::EndTurn);
        assert_eq!(map_stop_reason("max_tokens").unwrap(), StopReason::MaxTokens);
        assert_eq!(map_stop_reason("tool_use").unwrap(), StopReason::ToolCall);
        assert_eq!(map_stop_reason("stop_sequence").unwrap(), StopReason::StopSequence);
        assert_eq!(map_stop_reason("pause_turn").unwrap(), StopReason::PauseTurn);
        assert_eq!(map_stop_reason("refusal").unwrap(), StopReason::Refusal);
        assert!(map_stop_reason("mystery").is_err());
    }
}
