use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::audio::AudioFormat;

/// Request for a text-to-text generation stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToTextRequest {
    /// Model resource name, `providers/{provider}/models/{model}`.
    pub model: String,

    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,

    /// Tools the model may call. Empty when tool calling is not wanted.
    #[serde(default)]
    pub tools: Vec<Tool>,

    /// Generation knobs.
    #[serde(default)]
    pub configuration: GenerationConfig,
}

impl TextToTextRequest {
    /// Look up a declared tool by name.
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

/// Generation configuration shared by every text-to-text provider.
///
/// Providers translate these knobs into their own request shape; fields a
/// provider cannot express are dropped by its adapter, except for
/// `tool_choice` which must never silently degrade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,

    /// Reasoning budget request, mapped per provider (token budgets,
    /// thinking levels or effort enums).
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,

    pub tool_choice: Option<ToolChoice>,

    /// When set, adapters emit healed partial tool calls after every
    /// argument fragment in addition to the final call.
    #[serde(default)]
    pub stream_partial_tool_calls: bool,

    /// When set, the unary projection extracts the first JSON object from
    /// the accumulated content and returns it as structured content.
    #[serde(default)]
    pub extract_json_object: bool,
}

/// Requested reasoning effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasoningEffort {
    #[default]
    Unspecified,
    Default,
    Low,
    Medium,
    High,
}

/// Controls how the model uses the declared tools.
///
/// `None` and `Required` are hard constraints; adapters must map them to
/// the upstream analog or reject the request, never fall back to `Auto`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model must not call any tool.
    None,
    /// The model decides whether to call a tool.
    Auto,
    /// The model must call at least one tool.
    Required,
    /// The model must call the named tool.
    Tool { name: String },
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content_blocks: Vec<ContentBlock>,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        structured_content: Option<Value>,
        #[serde(default)]
        tool_calls: Vec<AssistantToolCall>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
    },
}

impl Message {
    /// Convenience constructor for a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content_blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// A block of user content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
        media_type: String,
        #[serde(default)]
        quality: Option<ImageQuality>,
    },
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Data { data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQuality {
    Low,
    High,
}

/// A tool call recorded on a prior assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
    /// Provider-specific fields round-tripped verbatim (e.g. upstream
    /// signatures on reasoning tool calls).
    #[serde(default)]
    pub extra_fields: Option<Value>,
}

/// Outcome of a tool execution, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolResult {
    Content(String),
    StructuredContent(Value),
    Error(String),
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub json_schema: JsonSchema,
    /// Opaque caller annotations, copied onto every tool call the model
    /// makes against this tool.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// The subset of JSON Schema the gateway carries for tool parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    pub r#type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl JsonSchema {
    pub fn object(properties: BTreeMap<String, Value>, required: Vec<String>) -> Self {
        Self {
            r#type: "object".to_string(),
            properties,
            required,
            description: None,
        }
    }
}

/// Request for a text-to-speech stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSpeechRequest {
    /// Model resource name.
    pub model: String,
    /// Voice resource name, `voices/{voice}`.
    pub voice: String,
    pub text: String,
    /// Requested output sample rate; must be one of the model's supported
    /// rates when set.
    pub sample_rate: Option<u32>,
}

/// Request for a unary speech-to-text transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechToTextRequest {
    pub model: String,
    pub audio: Vec<u8>,
    pub audio_format: AudioFormat,
}

/// Client-to-server events of a speech-to-text stream.
///
/// The configuration event must arrive first; audio frames follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpeechToTextStreamRequest {
    Configuration {
        model: String,
        audio_format: AudioFormat,
    },
    Audio {
        data: Vec<u8>,
    },
}
