//! OpenAI-compatible wire chunks → canonical events.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::messages::response::{ModelUsage, ResourceUsage, StopReason};

/// One SSE chunk of a chat completion stream.
#[derive(Debug, Deserialize)]
pub(super) struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Present on the trailing usage chunk when `include_usage` is set.
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// DeepSeek-style reasoning channel, also used by Groq's `parsed`
    /// reasoning format.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// xAI-style reasoning channel; some gateways double-encode the value.
    #[serde(default)]
    pub reasoning: Option<Value>,
    /// Google's OpenAI shim marks reasoning content with a thought flag.
    #[serde(default)]
    pub thought: bool,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StreamingToolCall {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    pub completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: Option<u64>,
}

impl ChunkDelta {
    /// Normalize the three reasoning encodings onto one channel.
    ///
    /// Returns `(reasoning, content)`; the Google shim's thought flag moves
    /// `content` itself onto the reasoning channel.
    pub fn split_reasoning(self) -> (Option<String>, Option<String>) {
        if self.thought {
            return (self.content, None);
        }

        if let Some(text) = self.reasoning_content {
            return (Some(text), self.content);
        }

        let reasoning = match self.reasoning {
            Some(Value::String(text)) => {
                // Some upstreams ship the value JSON-encoded a second time.
                if text.starts_with('"') && text.ends_with('"') && text.len() >= 2 {
                    Some(serde_json::from_str::<String>(&text).unwrap_or(text))
                } else {
                    Some(text)
                }
            }
            Some(_) | None => None,
        };

        (reasoning, self.content)
    }
}

/// Total finish-reason table; a miss is a protocol violation.
pub(super) fn map_finish_reason(reason: &str) -> crate::Result<StopReason> {
    match reason {
        "stop" => Ok(StopReason::EndTurn),
        "length" => Ok(StopReason::MaxTokens),
        "tool_calls" | "function_call" => Ok(StopReason::ToolCall),
        "content_filter" => Ok(StopReason::Refusal),
        other => Err(Error::Protocol(format!("unknown finish reason '{other}'"))),
    }
}

impl ChatUsage {
    /// Split raw upstream counters into the canonical accounting:
    /// cached tokens come out of the input bucket, reasoning tokens out of
    /// the output bucket. A reported reasoning count must agree with the
    /// one inferred from the totals.
    pub fn into_model_usage(self) -> crate::Result<ModelUsage> {
        let cached = self.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0);

        if cached > self.prompt_tokens {
            return Err(Error::Protocol(format!(
                "cached tokens ({cached}) exceed prompt tokens ({})",
                self.prompt_tokens
            )));
        }

        let input = self.prompt_tokens - cached;

        let reasoning = match self.completion_tokens_details.and_then(|d| d.reasoning_tokens) {
            Some(reported) => {
                if reported > self.completion_tokens {
                    return Err(Error::Protocol(format!(
                        "reasoning tokens ({reported}) exceed completion tokens ({})",
                        self.completion_tokens
                    )));
                }

                let output = self.completion_tokens - reported;
                let inferred = self.total_tokens as i128 - input as i128 - cached as i128 - output as i128;

                if inferred != reported as i128 {
                    return Err(Error::Protocol(format!(
                        "reported reasoning tokens ({reported}) disagree with inferred ({inferred})"
                    )));
                }

                reported
            }
            None => self
                .total_tokens
                .saturating_sub(self.prompt_tokens + self.completion_tokens),
        };

        let output = if self.completion_tokens >= reasoning {
            self.completion_tokens - reasoning
        } else {
            self.completion_tokens
        };

        Ok(ModelUsage {
            input_token: ResourceUsage::quantity(input),
            input_cache_read_token: ResourceUsage::quantity(cached),
            output_token: ResourceUsage::quantity(output),
            output_reasoning_token: ResourceUsage::quantity(reasoning),
        })
    }
}
