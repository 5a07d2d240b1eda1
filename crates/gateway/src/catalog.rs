//! Model and voice catalog entities.
//!
//! Each provider ships an embedded JSON catalog describing its models and
//! voices. Catalogs are parsed strictly (unknown fields rejected) at
//! registration time and converted into [`Model`]/[`Voice`] entities keyed
//! by resource name. Entities are never mutated or deleted at runtime.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::messages::audio::AudioFormat;
use crate::messages::response::ModelUsage;
use crate::resource::{ModelName, VoiceName};

/// A model offered by a registered provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Globally unique resource name, `providers/{provider}/models/{model}`.
    pub name: String,
    /// The upstream's own identifier for this model.
    pub provider_model_id: String,
    /// Exactly one capability variant.
    pub capability: Capability,
    /// If set and in the past, every use fails with FailedPrecondition.
    pub deprecate_time: Option<SystemTime>,
    /// Opaque provider-specific knobs, consumed only at known keys.
    pub provider_settings: Map<String, Value>,
    /// Optional post-hoc pricing applied to reported usage.
    pub pricing: Option<Pricing>,
}

impl Model {
    pub fn model_name(&self) -> crate::Result<ModelName> {
        ModelName::parse(&self.name)
    }

    /// Deprecation gate; checked before any adapter work.
    pub fn check_not_deprecated(&self) -> crate::Result<()> {
        if let Some(deprecate_time) = self.deprecate_time
            && deprecate_time <= SystemTime::now()
        {
            return Err(Error::ModelDeprecated(self.name.clone()));
        }

        Ok(())
    }

    /// A string-valued provider setting at a known key.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.provider_settings.get(key).and_then(Value::as_str)
    }

    /// A numeric provider setting at a known key.
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.provider_settings.get(key).and_then(Value::as_u64)
    }
}

/// Capability variant of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Capability {
    TextToText(TextToTextConfig),
    SpeechToText(SpeechToTextConfig),
    TextToSpeech(TextToSpeechConfig),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextToText(_) => "text-to-text",
            Self::SpeechToText(_) => "speech-to-text",
            Self::TextToSpeech(_) => "text-to-speech",
        }
    }

    pub fn as_text_to_text(&self) -> Option<&TextToTextConfig> {
        match self {
            Self::TextToText(config) => Some(config),
            _ => None,
        }
    }

    pub fn as_text_to_speech(&self) -> Option<&TextToSpeechConfig> {
        match self {
            Self::TextToSpeech(config) => Some(config),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextToTextConfig {
    pub context_token_limit: u32,
    pub output_token_limit: u32,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub tool_call: bool,
}

/// Speech-to-text carries no extra configuration today.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeechToTextConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextToSpeechConfig {
    pub audio_format: AudioFormat,
    pub supported_sample_rates: Vec<u32>,
}

/// USD per million tokens, per resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pricing {
    #[serde(default)]
    pub input_token: f64,
    #[serde(default)]
    pub input_cache_read_token: f64,
    #[serde(default)]
    pub output_token: f64,
    #[serde(default)]
    pub output_reasoning_token: f64,
}

impl Pricing {
    /// Set per-resource costs on a usage total.
    pub fn apply(&self, usage: &mut ModelUsage) {
        const PER: f64 = 1_000_000.0;

        usage.input_token.cost = Some(usage.input_token.quantity as f64 * self.input_token / PER);
        usage.input_cache_read_token.cost =
            Some(usage.input_cache_read_token.quantity as f64 * self.input_cache_read_token / PER);
        usage.output_token.cost = Some(usage.output_token.quantity as f64 * self.output_token / PER);
        usage.output_reasoning_token.cost =
            Some(usage.output_reasoning_token.quantity as f64 * self.output_reasoning_token / PER);
    }
}

/// A voice, mapping one resource name onto per-model upstream voice ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    /// Resource name, `voices/{voice}`.
    pub name: String,
    pub mappings: Vec<VoiceMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceMapping {
    /// Model resource name this mapping applies to.
    pub model: String,
    /// The upstream's voice identifier.
    pub provider_voice_id: String,
}

impl Voice {
    /// The upstream voice id for the given model resource name.
    pub fn provider_voice_id(&self, model: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.model == model)
            .map(|mapping| mapping.provider_voice_id.as_str())
    }
}

/// On-disk catalog shape, strict.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub models: Vec<CatalogModel>,
    #[serde(default)]
    pub voices: Vec<CatalogVoice>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogModel {
    pub id: String,
    pub provider_model_id: String,
    pub capability: Capability,
    /// Unix epoch seconds; uses fail after this instant.
    #[serde(default)]
    pub deprecate_time: Option<u64>,
    #[serde(default)]
    pub provider_settings: Map<String, Value>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogVoice {
    pub id: String,
    pub mappings: Vec<VoiceMapping>,
}

impl Catalog {
    /// Strict-parse an embedded catalog document.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            log::error!("catalog failed strict parsing: {e}");
            Error::InvalidRequest(format!("malformed provider catalog: {e}"))
        })
    }
}

impl CatalogModel {
    /// Materialize into a [`Model`] under the given provider id.
    pub fn into_model(self, provider_id: &str) -> Model {
        Model {
            name: ModelName::new(provider_id, &self.id).to_string(),
            provider_model_id: self.provider_model_id,
            capability: self.capability,
            deprecate_time: self.deprecate_time.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
            provider_settings: self.provider_settings,
            pricing: self.pricing,
        }
    }
}

impl CatalogVoice {
    pub fn into_voice(self) -> Voice {
        Voice {
            name: VoiceName {
                voice_id: self.id,
            }
            .to_string(),
            mappings: self.mappings,
        }
    }
}

/// Structural validation applied to every model at registration.
///
/// Stands in for the transport layer's protobuf validator, which is
/// outside this crate.
pub fn validate_model(model: &Model) -> crate::Result<()> {
    let name = model.model_name()?;

    if name.model_id.trim().is_empty() || model.provider_model_id.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("model '{}' has empty identifiers", model.name)));
    }

    match &model.capability {
        Capability::TextToText(config) => {
            if config.context_token_limit == 0 || config.output_token_limit == 0 {
                return Err(Error::InvalidRequest(format!(
                    "model '{}' has zero token limits",
                    model.name
                )));
            }
        }
        Capability::TextToSpeech(config) => {
            if config.supported_sample_rates.is_empty() {
                return Err(Error::InvalidRequest(format!(
                    "model '{}' supports no sample rates",
                    model.name
                )));
            }
        }
        Capability::SpeechToText(_) => {}
    }

    Ok(())
}
