//! Canonical request → Anthropic Messages API request.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{Model, TextToTextConfig};
use crate::error::Error;
use crate::messages::request::{
    ContentBlock, ImageSource, Message, ReasoningEffort, TextToTextRequest, Tool, ToolChoice, ToolResult,
};

/// Media types the Messages API accepts for image blocks.
const ALLOWED_IMAGE_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Thinking budgets per requested effort.
const THINKING_BUDGET_LOW: u32 = 1024;
const THINKING_BUDGET_MEDIUM: u32 = 5000;
const THINKING_BUDGET_HIGH: u32 = 10000;

#[derive(Debug, Serialize)]
pub(super) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub(super) struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct Thinking {
    pub r#type: &'static str,
    pub budget_tokens: u32,
}

impl AnthropicRequest {
    pub fn build(model: &Model, config: &TextToTextConfig, request: &TextToTextRequest) -> crate::Result<Self> {
        let mut system = None;
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            match message {
                Message::System { content } => {
                    // The Messages API takes the system prompt out of band.
                    system = Some(match system.take() {
                        None => content.clone(),
                        Some(existing) => format!("{existing}\n{content}"),
                    });
                }
                Message::User { content_blocks } => {
                    let content = content_blocks.iter().map(translate_user_block).collect::<crate::Result<_>>()?;
                    messages.push(AnthropicMessage { role: "user", content });
                }
                Message::Assistant {
                    content,
                    reasoning: _,
                    structured_content: _,
                    tool_calls,
                } => {
                    let mut blocks = Vec::new();

                    if let Some(text) = content
                        && !text.is_empty()
                    {
                        blocks.push(serde_json::json!({ "type": "text", "text": text }));
                    }

                    for call in tool_calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }

                    messages.push(AnthropicMessage {
                        role: "assistant",
                        content: blocks,
                    });
                }
                Message::Tool {
                    tool_call_id, result, ..
                } => {
                    // No tool role upstream; results travel as user-role
                    // tool_result blocks.
                    messages.push(AnthropicMessage {
                        role: "user",
                        content: vec![translate_tool_result(tool_call_id, result)],
                    });
                }
            }
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
            .map(translate_tool_choice);

        let thinking = if config.reasoning {
            thinking_budget(request.configuration.reasoning_effort).map(|budget_tokens| Thinking {
                r#type: "enabled",
                budget_tokens,
            })
        } else {
            None
        };

        Ok(Self {
            model: model.provider_model_id.clone(),
            // max_tokens is mandatory upstream; fall back to the model cap.
            max_tokens: request.configuration.max_tokens.unwrap_or(config.output_token_limit),
            messages,
            system,
            temperature: request.configuration.temperature,
            tools,
            tool_choice,
            thinking,
            stream: true,
        })
    }
}

fn translate_user_block(block: &ContentBlock) -> crate::Result<Value> {
    match block {
        ContentBlock::Text { text } => Ok(serde_json::json!({ "type": "text", "text": text })),
        ContentBlock::Image {
            source, media_type, ..
        } => {
            if !ALLOWED_IMAGE_MEDIA_TYPES.contains(&media_type.as_str()) {
                return Err(Error::InvalidRequest(format!("unsupported media type '{media_type}'")));
            }

            let source = match source {
                ImageSource::Url { url } => serde_json::json!({
                    "type": "url",
                    "url": url,
                }),
                ImageSource::Data { data } => serde_json::json!({
                    "type": "base64",
                    "media_type": media_type,
                    "data": STANDARD.encode(data),
                }),
            };

            Ok(serde_json::json!({ "type": "image", "source": source }))
        }
    }
}

fn translate_tool_result(tool_call_id: &str, result: &ToolResult) -> Value {
    let (content, is_error) = match result {
        ToolResult::Content(text) => (Value::String(text.clone()), false),
        ToolResult::StructuredContent(value) => (Value::String(value.to_string()), false),
        ToolResult::Error(message) => (Value::String(message.clone()), true),
    };

    serde_json::json!({
        "type": "tool_result",
        "tool_use_id": tool_call_id,
        "content": content,
        "is_error": is_error,
    })
}

fn translate_tool(tool: &Tool) -> AnthropicTool {
    AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: serde_json::to_value(&tool.json_schema).unwrap_or_else(|_| Value::Object(Default::default())),
    }
}

/// `required` maps onto the dialect's `any`; `none` stays `none`. Neither
/// degrades to `auto`.
fn translate_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::None => serde_json::json!({ "type": "none" }),
        ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
        ToolChoice::Required => serde_json::json!({ "type": "any" }),
        ToolChoice::Tool { name } => serde_json::json!({ "type": "tool", "name": name }),
    }
}

fn thinking_budget(effort: ReasoningEffort) -> Option<u32> {
    match effort {
        ReasoningEffort::Unspecified => None,
        ReasoningEffort::Low => Some(THINKING_BUDGET_LOW),
        ReasoningEffort::Medium | ReasoningEffort::Default => Some(THINKING_BUDGET_MEDIUM),
        ReasoningEffort::High => Some(THINKING_BUDGET_HIGH),
    }
}
