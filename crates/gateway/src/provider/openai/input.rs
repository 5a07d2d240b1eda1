//! Canonical request → OpenAI-compatible chat completion request.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use serde_json::Value;

use super::{Dialect, ReasoningEncoding};
use crate::catalog::Model;
use crate::error::Error;
use crate::messages::request::{
    ContentBlock, ImageQuality, ImageSource, Message, ReasoningEffort, TextToTextRequest, Tool, ToolChoice, ToolResult,
};

/// Image media types the chat-completions dialects accept.
const ALLOWED_IMAGE_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Model-settings key for Groq's reasoning output framing.
pub(super) const REASONING_FORMAT_KEY: &str = "reasoning_format";

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_format: Option<String>,
    pub stream: bool,
    pub stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
pub(super) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatFunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, the dialect's convention.
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatTool {
    pub r#type: &'static str,
    pub function: ChatFunction,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ChatRequest {
    /// Translate the canonical request for `model` under `dialect`.
    pub fn build(model: &Model, request: &TextToTextRequest, dialect: &Dialect) -> crate::Result<Self> {
        let mut messages = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            messages.push(translate_message(message)?);
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(translate_tool).collect())
        };

        let tool_choice = request
            .configuration
            .tool_choice
            .as_ref()
            .map(translate_tool_choice)
            .transpose()?;

        let (reasoning_effort, reasoning_format) = match dialect.reasoning {
            ReasoningEncoding::Effort => (translate_reasoning_effort(request.configuration.reasoning_effort), None),
            ReasoningEncoding::GroqDefault => (
                Some("default"),
                model.setting_str(REASONING_FORMAT_KEY).map(str::to_string),
            ),
            ReasoningEncoding::Unset => (None, None),
        };

        Ok(Self {
            model: model.provider_model_id.clone(),
            messages,
            max_tokens: request.configuration.max_tokens,
            temperature: request.configuration.temperature,
            tools,
            tool_choice,
            reasoning_effort,
            reasoning_format,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        })
    }
}

fn translate_message(message: &Message) -> crate::Result<ChatMessage> {
    let translated = match message {
        Message::System { content } => ChatMessage {
            role: "system",
            content: Some(Value::String(content.clone())),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::User { content_blocks } => ChatMessage {
            role: "user",
            content: Some(translate_user_content(content_blocks)?),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant {
            content, tool_calls, ..
        } => {
            let tool_calls = if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .iter()
                        .map(|call| ChatToolCall {
                            id: call.id.clone(),
                            r#type: "function",
                            function: ChatFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                )
            };

            ChatMessage {
                role: "assistant",
                content: content.clone().map(Value::String),
                tool_calls,
                tool_call_id: None,
            }
        }
        Message::Tool {
            tool_call_id, result, ..
        } => ChatMessage {
            role: "tool",
            content: Some(Value::String(translate_tool_result(result))),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    };

    Ok(translated)
}

fn translate_user_content(blocks: &[ContentBlock]) -> crate::Result<Value> {
    // A single text block collapses to the plain-string form.
    if let [ContentBlock::Text { text }] = blocks {
        return Ok(Value::String(text.clone()));
    }

    let mut parts = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(serde_json::json!({
                "type": "text",
                "text": text,
            })),
            ContentBlock::Image {
                source,
                media_type,
                quality,
            } => {
                if !ALLOWED_IMAGE_MEDIA_TYPES.contains(&media_type.as_str()) {
                    return Err(Error::InvalidRequest(format!("unsupported media type '{media_type}'")));
                }

                let url = match source {
                    ImageSource::Url { url } => url.clone(),
                    ImageSource::Data { data } => {
                        format!("data:{media_type};base64,{}", STANDARD.encode(data))
                    }
                };

                let detail = quality.map(|quality| match quality {
                    ImageQuality::Low => "low",
                    ImageQuality::High => "high",
                });

                let mut image_url = serde_json::json!({ "url": url });
                if let Some(detail) = detail {
                    image_url["detail"] = Value::String(detail.to_string());
                }

                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": image_url,
                }));
            }
        }
    }

    Ok(Value::Array(parts))
}

fn translate_tool_result(result: &ToolResult) -> String {
    match result {
        ToolResult::Content(text) => text.clone(),
        ToolResult::StructuredContent(value) => value.to_string(),
        ToolResult::Error(message) => format!("ERROR: {message}"),
    }
}

fn translate_tool(tool: &Tool) -> ChatTool {
    ChatTool {
        r#type: "function",
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: serde_json::to_value(&tool.json_schema).unwrap_or_else(|_| Value::Object(Default::default())),
        },
    }
}

/// `none` and `required` are hard constraints in the dialect; only `auto`
/// leaves the decision to the model.
fn translate_tool_choice(choice: &ToolChoice) -> crate::Result<Value> {
    let value = match choice {
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::Tool { name } => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    };

    Ok(value)
}

fn translate_reasoning_effort(effort: ReasoningEffort) -> Option<&'static str> {
    match effort {
        ReasoningEffort::Unspecified => None,
        ReasoningEffort::Low => Some("low"),
        ReasoningEffort::Medium | ReasoningEffort::Default => Some("medium"),
        ReasoningEffort::High => Some("high"),
    }
}
