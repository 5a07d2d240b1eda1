//! Gemini stream chunks → canonical events.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::messages::response::{ModelUsage, ResourceUsage, StopReason};

/// One SSE chunk of a `streamGenerateContent` response.
#[derive(Debug, Deserialize)]
pub(super) struct GoogleStreamChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A candidate part: text (optionally a thought), inline data, or a
/// function call with structured arguments in a single delta.
#[derive(Debug, Deserialize)]
pub(super) struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: bool,
    #[serde(default, rename = "inlineData")]
    pub inline_data: Option<InlineData>,
    #[serde(default, rename = "functionCall")]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
pub(super) struct InlineData {
    #[serde(rename = "mimeType")]
    #[allow(dead_code)]
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(super) struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    pub prompt_token_count: u64,
    #[serde(default, rename = "candidatesTokenCount")]
    pub candidates_token_count: u64,
    #[serde(default, rename = "thoughtsTokenCount")]
    pub thoughts_token_count: u64,
    #[serde(default, rename = "cachedContentTokenCount")]
    pub cached_content_token_count: u64,
}

impl UsageMetadata {
    /// Cached content is a subset of the prompt count; thoughts are
    /// reported outside the candidates count.
    pub fn into_model_usage(self) -> crate::Result<ModelUsage> {
        if self.cached_content_token_count > self.prompt_token_count {
            return Err(Error::Protocol(format!(
                "cached content tokens ({}) exceed prompt tokens ({})",
                self.cached_content_token_count, self.prompt_token_count
            )));
        }

        Ok(ModelUsage {
            input_token: ResourceUsage::quantity(self.prompt_token_count - self.cached_content_token_count),
            input_cache_read_token: ResourceUsage::quantity(self.cached_content_token_count),
            output_token: ResourceUsage::quantity(self.candidates_token_count),
            output_reasoning_token: ResourceUsage::quantity(self.thoughts_token_count),
        })
    }
}

/// Total finish-reason table; a missing or unknown value is Internal.
pub(super) fn map_finish_reason(reason: &str) -> crate::Result<StopReason> {
    match reason {
        "STOP" => Ok(StopReason::EndTurn),
        "MAX_TOKENS" => Ok(StopReason::MaxTokens),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY" => {
            Ok(StopReason::Refusal)
        }
        other => Err(Error::Protocol(format!("unknown finish reason '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_splits_cached_and_thought_tokens() {
        let usage = UsageMetadata {
            prompt_token_count: 50,
            candidates_token_count: 10,
            thoughts_token_count: 30,
            cached_content_token_count: 20,
        };

        let model_usage = usage.into_model_usage().unwrap();
        assert_eq!(model_usage.input_token.quantity, 30);
        assert_eq!(model_usage.input_cache_read_token.quantity, 20);
        assert_eq!(model_usage.output_token.quantity, 10);
        assert_eq!(model_usage.output_reasoning_token.quantity, 30);
    }

    #[test]
    fn finish_reason_misses_are_protocol_errors() {
        assert_eq!(map_finish_reason("STOP").unwrap(), StopReason::EndTurn);
        assert_eq!(map_finish_reason("MAX_TOKENS").unwrap(), StopReason::MaxTokens);
        assert_eq!(map_finish_reason("SAFETY").unwrap(), StopReason::Refusal);
        assert!(map_finish_reason("FINISH_REASON_UNSPECIFIED").is_err());
    }

    #[test]
    fn parses_function_call_parts() {
        let chunk: GoogleStreamChunk = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"f","args":{"a":1}}}]}}]}"#,
        )
        .unwrap();

        let part = &chunk.candidates[0].content.as_ref().unwrap().parts[0];
        let call = part.function_call.as_ref().unwrap();
        assert_eq!(call.name, "f");
        assert_eq!(call.args["a"], 1);
    }
}
