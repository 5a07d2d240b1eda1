//! Canonical request → Gemini `generateContent` request.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};

use crate::catalog::{Model, TextToTextConfig};
use crate::error::Error;
use crate::messages::request::{
    ContentBlock, ImageSource, Message, ReasoningEffort, TextToTextRequest, Tool, ToolChoice, ToolResult,
};

const ALLOWED_IMAGE_MEDIA_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp", "image/heic"];

/// Settings key naming the generation-config field that carries thinking
/// configuration (`thinkingConfig` on current API surfaces).
pub(super) const THINKING_CONFIG_KEY: &str = "thinking_config_key";
/// Settings key selecting how the model expresses effort: `budget`
/// (thinking-token budget) or `level` (named level).
pub(super) const THINKING_VARIANT_KEY: &str = "thinking_variant";

const DEFAULT_THINKING_CONFIG_KEY: &str = "thinkingConfig";

/// Thinking-token budgets per requested effort.
const BUDGET_LOW: u64 = 1024;
const BUDGET_MEDIUM: u64 = 4096;
const BUDGET_HIGH: u64 = 16384;

/// Build the full request body as a JSON value; the thinking-config key is
/// dynamic, so a static struct does not fit.
pub(super) fn build_request(
    model: &Model,
    config: &TextToTextConfig,
    request: &TextToTextRequest,
) -> crate::Result<Value> {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message {
            Message::System { content } => {
                system_parts.push(serde_json::json!({ "text": content }));
            }
            Message::User { content_blocks } => {
                let parts = content_blocks.iter().map(translate_user_block).collect::<crate::Result<Vec<_>>>()?;
                contents.push(serde_json::json!({ "role": "user", "parts": parts }));
            }
            Message::Assistant {
                content, tool_calls, ..
            } => {
                let mut parts = Vec::new();

                if let Some(text) = content
                    && !text.is_empty()
                {
                    parts.push(serde_json::json!({ "text": text }));
                }

                for call in tool_calls {
                    parts.push(serde_json::json!({
                        "functionCall": { "name": call.name, "args": call.arguments }
                    }));
                }

                contents.push(serde_json::json!({ "role": "model", "parts": parts }));
            }
            Message::Tool {
                tool_name, result, ..
            } => {
                // Gemini has no tool role; responses travel as user-role
                // functionResponse parts keyed by function name.
                let response = match result {
                    ToolResult::Content(text) => serde_json::json!({ "content": text }),
                    ToolResult::StructuredContent(value) => value.clone(),
                    ToolResult::Error(message) => serde_json::json!({ "error": message }),
                };

                contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{ "functionResponse": { "name": tool_name, "response": response } }]
                }));
            }
        }
    }

    let mut generation_config = Map::new();

    if let Some(max_tokens) = request.configuration.max_tokens {
        generation_config.insert("maxOutputTokens".into(), max_tokens.into());
    }
    if let Some(temperature) = request.configuration.temperature {
        generation_config.insert("temperature".into(), Value::from(f64::from(temperature)));
    }

    if config.reasoning
        && let Some(thinking) = thinking_config(model, request.configuration.reasoning_effort)
    {
        let key = model
            .setting_str(THINKING_CONFIG_KEY)
            .unwrap_or(DEFAULT_THINKING_CONFIG_KEY)
            .to_string();
        generation_config.insert(key, thinking);
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));

    if !system_parts.is_empty() {
        body.insert(
            "systemInstruction".into(),
            serde_json::json!({ "parts": system_parts }),
        );
    }

    if !generation_config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(generation_config));
    }

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request.tools.iter().map(translate_tool).collect();
        body.insert(
            "tools".into(),
            serde_json::json!([{ "functionDeclarations": declarations }]),
        );
    }

    if let Some(choice) = &request.configuration.tool_choice {
        body.insert("toolConfig".into(), translate_tool_choice(choice));
    }

    Ok(Value::Object(body))
}

fn translate_user_block(block: &ContentBlock) -> crate::Result<Value> {
    match block {
        ContentBlock::Text { text } => Ok(serde_json::json!({ "text": text })),
        ContentBlock::Image {
            source, media_type, ..
        } => {
            if !ALLOWED_IMAGE_MEDIA_TYPES.contains(&media_type.as_str()) {
                return Err(Error::InvalidRequest(format!("unsupported media type '{media_type}'")));
            }

            match source {
                // The native API takes bytes inline; URLs are only valid
                // for uploaded files, which the gateway does not manage.
                ImageSource::Url { url } => Ok(serde_json::json!({
                    "fileData": { "mimeType": media_type, "fileUri": url }
                })),
                ImageSource::Data { data } => Ok(serde_json::json!({
                    "inlineData": { "mimeType": media_type, "data": STANDARD.encode(data) }
                })),
            }
        }
    }
}

fn translate_tool(tool: &Tool) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.json_schema,
    })
}

/// `NONE` and `ANY` are hard modes; only `AUTO` leaves the choice open.
fn translate_tool_choice(choice: &ToolChoice) -> Value {
    let config = match choice {
        ToolChoice::None => serde_json::json!({ "mode": "NONE" }),
        ToolChoice::Auto => serde_json::json!({ "mode": "AUTO" }),
        ToolChoice::Required => serde_json::json!({ "mode": "ANY" }),
        ToolChoice::Tool { name } => serde_json::json!({
            "mode": "ANY",
            "allowedFunctionNames": [name],
        }),
    };

    serde_json::json!({ "functionCallingConfig": config })
}

/// Per-model thinking encoding: a numeric budget or a named level,
/// selected by the `thinking_variant` provider setting.
fn thinking_config(model: &Model, effort: ReasoningEffort) -> Option<Value> {
    if effort == ReasoningEffort::Unspecified {
        return None;
    }

    match model.setting_str(THINKING_VARIANT_KEY) {
        Some("level") => {
            let level = match effort {
                ReasoningEffort::Low => "low",
                ReasoningEffort::Medium | ReasoningEffort::Default | ReasoningEffort::High => "high",
                ReasoningEffort::Unspecified => unreachable!(),
            };

            Some(serde_json::json!({ "thinkingLevel": level }))
        }
        _ => {
            let budget = match effort {
                ReasoningEffort::Low => BUDGET_LOW,
                ReasoningEffort::Medium | ReasoningEffort::Default => BUDGET_MEDIUM,
                ReasoningEffort::High => BUDGET_HIGH,
                ReasoningEffort::Unspecified => unreachable!(),
            };

            Some(serde_json::json!({ "thinkingBudget": budget }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Capability;
    use crate::messages::request::GenerationConfig;

    fn model(settings: serde_json::Map<String, Value>) -> (Model, TextToTextConfig) {
        let config = TextToTextConfig {
            context_token_limit: 1_000_000,
            output_token_limit: 65_536,
            reasoning: true,
            tool_call: true,
        };

        let model = Model {
            name: "providers/google/models/gemini-2.5-flash".into(),
            provider_model_id: "gemini-2.5-flash".into(),
            capability: Capability::TextToText(config.clone()),
            deprecate_time: None,
            provider_settings: settings,
            pricing: None,
        };

        (model, config)
    }

    fn request(effort: ReasoningEffort) -> TextToTextRequest {
        TextToTextRequest {
            model: "providers/google/models/gemini-2.5-flash".into(),
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            configuration: GenerationConfig {
                reasoning_effort: effort,
                ..Default::default()
            },
        }
    }

    #[test]
    fn budget_variant_uses_token_budgets() {
        let mut settings = serde_json::Map::new();
        settings.insert(THINKING_CONFIG_KEY.into(), "thinkingConfig".into());
        settings.insert(THINKING_VARIANT_KEY.into(), "budget".into());
        let (model, config) = model(settings);

        for (effort, expected) in [
            (ReasoningEffort::Low, 1024),
            (ReasoningEffort::Medium, 4096),
            (ReasoningEffort::Default, 4096),
            (ReasoningEffort::High, 16384),
        ] {
            let body = build_request(&model, &config, &request(effort)).unwrap();
            assert_eq!(
                body["generationConfig"]["thinkingConfig"]["thinkingBudget"], expected,
                "{effort:?}"
            );
        }
    }

    #[test]
    fn level_variant_collapses_medium_onto_high() {
        let mut settings = serde_json::Map::new();
        settings.insert(THINKING_VARIANT_KEY.into(), "level".into());
        let (model, config) = model(settings);

        for (effort, expected) in [
            (ReasoningEffort::Low, "low"),
            (ReasoningEffort::Medium, "high"),
            (ReasoningEffort::Default, "high"),
            (ReasoningEffort::High, "high"),
        ] {
            let body = build_request(&model, &config, &request(effort)).unwrap();
            assert_eq!(
                body["generationConfig"]["thinkingConfig"]["thinkingLevel"], expected,
                "{effort:?}"
            );
        }
    }

    #[test]
    fn unspecified_effort_omits_thinking_config() {
        let (model, config) = model(serde_json::Map::new());
        let body = build_request(&model, &config, &request(ReasoningEffort::Unspecified)).unwrap();

        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn tool_results_become_function_responses() {
        let (model, config) = model(serde_json::Map::new());
        let mut request = request(ReasoningEffort::Unspecified);
        request.messages = vec![Message::Tool {
            tool_call_id: "t1".into(),
            tool_name: "f".into(),
            result: ToolResult::StructuredContent(serde_json::json!({"ok": true})),
        }];

        let body = build_request(&model, &config, &request).unwrap();
        let part = &body["contents"][0]["parts"][0];

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(part["functionResponse"]["name"], "f");
        assert_eq!(part["functionResponse"]["response"]["ok"], true);
    }

    #[test]
    fn required_tool_choice_maps_to_any_mode() {
        let choice = translate_tool_choice(&ToolChoice::Required);
        assert_eq!(choice["functionCallingConfig"]["mode"], "ANY");

        let named = translate_tool_choice(&ToolChoice::Tool { name: "f".into() });
        assert_eq!(named["functionCallingConfig"]["allowedFunctionNames"][0], "f");
    }
}
