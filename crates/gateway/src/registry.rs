//! Model and voice registry.
//!
//! The registry owns `{provider_id → provider}`, `{provider_id →
//! {model name → Model}}` and `{voice name → Voice}`. All mutation happens
//! at startup (provider registration, explicit creates); after that every
//! access is a read.

pub mod pagination;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use itertools::Itertools;

use crate::catalog::{Catalog, Model, Voice, VoiceMapping, validate_model};
use crate::error::Error;
use crate::provider::{
    Provider, SpeechToTextProvider, SpeechToTextStreamProvider, TextToSpeechProvider, TextToTextProvider,
};
use crate::resource::{ModelName, ModelParent, VoiceName};

/// Registry of providers, their models and the voice catalog.
#[derive(Default)]
pub struct Registry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
    /// provider id → model resource name → model.
    models: RwLock<HashMap<String, BTreeMap<String, Arc<Model>>>>,
    /// Name-sorted voice cache.
    voices: RwLock<BTreeMap<String, Voice>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider: strict-parse its embedded catalog, validate and
    /// store every model and voice, then start the provider.
    pub async fn register_provider(&self, provider: Arc<dyn Provider>) -> crate::Result<()> {
        let provider_id = provider.id().to_string();
        let catalog = Catalog::parse(provider.catalog())?;

        let mut models = BTreeMap::new();
        for entry in catalog.models {
            let model = entry.into_model(&provider_id);
            validate_model(&model)?;
            models.insert(model.name.clone(), Arc::new(model));
        }

        {
            let mut providers = self.providers.write().expect("registry lock");
            if providers.contains_key(&provider_id) {
                return Err(Error::InvalidRequest(format!(
                    "provider '{provider_id}' is already registered"
                )));
            }

            providers.insert(provider_id.clone(), Arc::clone(&provider));
            self.models.write().expect("registry lock").insert(provider_id.clone(), models);
        }

        for entry in catalog.voices {
            let voice = entry.into_voice();
            self.merge_voice(voice);
        }

        provider.start().await.map_err(|e| {
            log::error!("provider '{provider_id}' failed to start: {e}");
            Error::Internal(Some(format!("provider '{provider_id}' failed to start")))
        })?;

        log::debug!("registered provider '{provider_id}'");

        Ok(())
    }

    /// Stop every registered provider.
    pub async fn shutdown(&self) {
        let providers: Vec<Arc<dyn Provider>> =
            self.providers.read().expect("registry lock").values().cloned().collect();

        for provider in providers {
            provider.stop().await;
        }
    }

    /// Create a model under `parent` (`providers/{provider}`), assigning its
    /// resource name from the parent and `model_id`.
    pub fn create_model(&self, parent: &str, model_id: &str, mut model: Model) -> crate::Result<Model> {
        let parent = match ModelParent::parse(parent)? {
            ModelParent::Provider(provider_id) => provider_id,
            ModelParent::Wildcard => return Err(Error::InvalidResourceName(parent.to_string())),
        };

        if !self.providers.read().expect("registry lock").contains_key(&parent) {
            return Err(Error::ProviderNotRegistered(parent));
        }

        model.name = ModelName::new(&parent, model_id).to_string();
        validate_model(&model)?;

        let mut models = self.models.write().expect("registry lock");
        let provider_models = models.entry(parent).or_default();

        if provider_models.contains_key(&model.name) {
            return Err(Error::InvalidRequest(format!("model '{}' already exists", model.name)));
        }

        provider_models.insert(model.name.clone(), Arc::new(model.clone()));

        Ok(model)
    }

    /// Deep copy of the model at `name`.
    pub fn get_model(&self, name: &str) -> crate::Result<Model> {
        self.model(name).map(|model| (*model).clone())
    }

    fn model(&self, name: &str) -> crate::Result<Arc<Model>> {
        let parsed = ModelName::parse(name)?;
        let models = self.models.read().expect("registry lock");

        models
            .get(&parsed.provider_id)
            .and_then(|provider_models| provider_models.get(name))
            .cloned()
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))
    }

    /// List models under `parent`, name-ascending. `providers/-` lists all.
    pub fn list_models(&self, parent: &str, page_size: u32, page_token: &str) -> crate::Result<(Vec<Model>, String)> {
        let parent = ModelParent::parse(parent)?;
        let models = self.models.read().expect("registry lock");

        let snapshot: Vec<Model> = models
            .iter()
            .filter(|(provider_id, _)| parent.matches(provider_id))
            .flat_map(|(_, provider_models)| provider_models.values())
            .map(|model| (**model).clone())
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect();

        pagination::paginate(&snapshot, page_size, page_token)
    }

    fn provider(&self, provider_id: &str) -> crate::Result<Arc<dyn Provider>> {
        self.providers
            .read()
            .expect("registry lock")
            .get(provider_id)
            .cloned()
            .ok_or_else(|| Error::ProviderNotRegistered(provider_id.to_string()))
    }

    /// Resolve the text-to-text adapter and model for a model name.
    ///
    /// Wrong capability is the caller's mistake (InvalidArgument); a model
    /// whose provider never registered, or registered without the adapter,
    /// is a deployment problem (FailedPrecondition).
    pub fn text_to_text_provider(&self, name: &str) -> crate::Result<(Arc<dyn TextToTextProvider>, Model)> {
        let model = self.model(name)?;

        if model.capability.as_text_to_text().is_none() {
            return Err(Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "text-to-text",
            });
        }

        let provider_id = model.model_name()?.provider_id;
        let adapter = self
            .provider(&provider_id)?
            .text_to_text()
            .ok_or_else(|| Error::ProviderNotRegistered(provider_id))?;

        Ok((adapter, (*model).clone()))
    }

    /// Resolve the unary speech-to-text adapter and model.
    pub fn speech_to_text_provider(&self, name: &str) -> crate::Result<(Arc<dyn SpeechToTextProvider>, Model)> {
        let model = self.model(name)?;

        if !matches!(model.capability, crate::catalog::Capability::SpeechToText(_)) {
            return Err(Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "speech-to-text",
            });
        }

        let provider_id = model.model_name()?.provider_id;
        let adapter = self
            .provider(&provider_id)?
            .speech_to_text()
            .ok_or_else(|| Error::ProviderNotRegistered(provider_id))?;

        Ok((adapter, (*model).clone()))
    }

    /// Resolve the streaming speech-to-text adapter and model.
    pub fn speech_to_text_stream_provider(
        &self,
        name: &str,
    ) -> crate::Result<(Arc<dyn SpeechToTextStreamProvider>, Model)> {
        let model = self.model(name)?;

        if !matches!(model.capability, crate::catalog::Capability::SpeechToText(_)) {
            return Err(Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "speech-to-text",
            });
        }

        let provider_id = model.model_name()?.provider_id;
        let adapter = self
            .provider(&provider_id)?
            .speech_to_text_stream()
            .ok_or_else(|| Error::ProviderNotRegistered(provider_id))?;

        Ok((adapter, (*model).clone()))
    }

    /// Resolve the text-to-speech adapter and model.
    pub fn text_to_speech_provider(&self, name: &str) -> crate::Result<(Arc<dyn TextToSpeechProvider>, Model)> {
        let model = self.model(name)?;

        if model.capability.as_text_to_speech().is_none() {
            return Err(Error::CapabilityMismatch {
                model: name.to_string(),
                capability: "text-to-speech",
            });
        }

        let provider_id = model.model_name()?.provider_id;
        let adapter = self
            .provider(&provider_id)?
            .text_to_speech()
            .ok_or_else(|| Error::ProviderNotRegistered(provider_id))?;

        Ok((adapter, (*model).clone()))
    }

    /// Create a voice at `voices/{voice_id}`.
    pub fn create_voice(&self, voice_id: &str, mappings: Vec<VoiceMapping>) -> crate::Result<Voice> {
        let name = VoiceName {
            voice_id: voice_id.to_string(),
        };

        if voice_id.is_empty() || voice_id.contains('/') {
            return Err(Error::InvalidResourceName(name.to_string()));
        }

        let voice = Voice {
            name: name.to_string(),
            mappings,
        };

        let mut voices = self.voices.write().expect("registry lock");
        if voices.contains_key(&voice.name) {
            return Err(Error::InvalidRequest(format!("voice '{}' already exists", voice.name)));
        }
        voices.insert(voice.name.clone(), voice.clone());

        Ok(voice)
    }

    /// Merge a catalog voice into the cache, extending mappings when the
    /// same voice id arrives from several providers.
    fn merge_voice(&self, voice: Voice) {
        let mut voices = self.voices.write().expect("registry lock");

        match voices.get_mut(&voice.name) {
            Some(existing) => existing.mappings.extend(voice.mappings),
            None => {
                voices.insert(voice.name.clone(), voice);
            }
        }
    }

    pub fn get_voice(&self, name: &str) -> crate::Result<Voice> {
        VoiceName::parse(name)?;

        self.voices
            .read()
            .expect("registry lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::VoiceNotFound(name.to_string()))
    }

    /// List voices, name-ascending.
    pub fn list_voices(&self, page_size: u32, page_token: &str) -> crate::Result<(Vec<Voice>, String)> {
        let snapshot: Vec<Voice> = self.voices.read().expect("registry lock").values().cloned().collect();

        pagination::paginate(&snapshot, page_size, page_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Capability, SpeechToTextConfig, TextToTextConfig};
    use crate::error::Code;
    use async_trait::async_trait;

    fn unwrap_err<T>(result: Result<T, Error>) -> Error {
        match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        }
    }

    struct StubProvider {
        id: &'static str,
        catalog: &'static str,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn catalog(&self) -> &'static str {
            self.catalog
        }
    }

    const ALPHA_CATALOG: &str = r#"{
        "models": [
            { "id": "m1", "provider_model_id": "m1", "capability": { "type": "speech_to_text" } },
            { "id": "m3", "provider_model_id": "m3", "capability": { "type": "speech_to_text" } },
            { "id": "m5", "provider_model_id": "m5", "capability": { "type": "speech_to_text" } }
        ],
        "voices": [
            { "id": "river", "mappings": [ { "model": "providers/alpha/models/m1", "provider_voice_id": "r1" } ] }
        ]
    }"#;

    const BETA_CATALOG: &str = r#"{
        "models": [
            { "id": "m2", "provider_model_id": "m2", "capability": { "type": "speech_to_text" } },
            { "id": "m4", "provider_model_id": "m4", "capability": { "type": "speech_to_text" } }
        ]
    }"#;

    async fn registry_with_two_providers() -> Registry {
        let registry = Registry::new();

        registry
            .register_provider(Arc::new(StubProvider {
                id: "alpha",
                catalog: ALPHA_CATALOG,
            }))
            .await
            .unwrap();

        registry
            .register_provider(Arc::new(StubProvider {
                id: "beta",
                catalog: BETA_CATALOG,
            }))
            .await
            .unwrap();

        registry
    }

    #[tokio::test]
    async fn duplicate_provider_registration_is_rejected() {
        let registry = Registry::new();
        let provider = || {
            Arc::new(StubProvider {
                id: "alpha",
                catalog: r#"{"models": []}"#,
            })
        };

        registry.register_provider(provider()).await.unwrap();
        let err = registry.register_provider(provider()).await.unwrap_err();

        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn get_model_returns_a_deep_copy() {
        let registry = registry_with_two_providers().await;

        let model = registry.get_model("providers/alpha/models/m1").unwrap();
        assert_eq!(model.capability, Capability::SpeechToText(SpeechToTextConfig::default()));

        let err = registry.get_model("providers/alpha/models/ghost").unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        insta::assert_snapshot!(err.to_string(), @"model 'providers/alpha/models/ghost' not found");
    }

    #[tokio::test]
    async fn list_models_paginates_in_ascending_name_order() {
        let registry = registry_with_two_providers().await;

        let (page, token) = registry.list_models("providers/-", 2, "").unwrap();
        assert_eq!(
            page.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["providers/alpha/models/m1", "providers/alpha/models/m3"]
        );

        let (page, token) = registry.list_models("providers/-", 2, &token).unwrap();
        assert_eq!(
            page.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["providers/alpha/models/m5", "providers/beta/models/m2"]
        );

        let (page, token) = registry.list_models("providers/-", 2, &token).unwrap();
        assert_eq!(
            page.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["providers/beta/models/m4"]
        );
        assert!(token.is_empty());
    }

    #[tokio::test]
    async fn list_models_filters_by_provider_parent() {
        let registry = registry_with_two_providers().await;

        let (page, token) = registry.list_models("providers/beta", 10, "").unwrap();
        assert_eq!(page.len(), 2);
        assert!(token.is_empty());
        assert!(page.iter().all(|m| m.name.starts_with("providers/beta/")));
    }

    #[tokio::test]
    async fn create_model_requires_a_registered_provider() {
        let registry = registry_with_two_providers().await;

        let model = Model {
            name: String::new(),
            provider_model_id: "chat-2".into(),
            capability: Capability::TextToText(TextToTextConfig {
                context_token_limit: 1000,
                output_token_limit: 100,
                reasoning: false,
                tool_call: false,
            }),
            deprecate_time: None,
            provider_settings: serde_json::Map::new(),
            pricing: None,
        };

        let err = unwrap_err(registry.create_model("providers/ghost", "chat", model.clone()));
        assert_eq!(err.code(), Code::FailedPrecondition);

        let created = registry.create_model("providers/alpha", "chat", model).unwrap();
        assert_eq!(created.name, "providers/alpha/models/chat");
        assert!(registry.get_model("providers/alpha/models/chat").is_ok());
    }

    #[tokio::test]
    async fn capability_lookup_distinguishes_error_kinds() {
        let registry = registry_with_two_providers().await;

        // STT model looked up through the TTT surface: caller error.
        let err = unwrap_err(registry.text_to_text_provider("providers/alpha/models/m1"));
        assert_eq!(err.code(), Code::InvalidArgument);

        // Capability matches but the provider registered no stream adapter.
        let err = unwrap_err(registry.speech_to_text_stream_provider("providers/alpha/models/m1"));
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn voices_load_from_catalogs_and_creates() {
        let registry = registry_with_two_providers().await;

        let voice = registry.get_voice("voices/river").unwrap();
        assert_eq!(voice.provider_voice_id("providers/alpha/models/m1"), Some("r1"));

        registry
            .create_voice(
                "brook",
                vec![VoiceMapping {
                    model: "providers/beta/models/m2".into(),
                    provider_voice_id: "b7".into(),
                }],
            )
            .unwrap();

        let (voices, token) = registry.list_voices(10, "").unwrap();
        assert!(token.is_empty());
        assert_eq!(
            voices.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
            vec!["voices/brook", "voices/river"]
        );

        let err = registry.get_voice("voices/ghost").unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }
}
