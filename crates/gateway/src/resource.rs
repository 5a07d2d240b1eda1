//! AIP-style resource names.
//!
//! Models live under `providers/{provider}/models/{model}`, voices under
//! `voices/{voice}`. Identifiers are opaque but must be non-empty and free
//! of `/`.

use std::fmt;

use crate::error::Error;

/// The wildcard provider segment accepted by list parents.
pub const WILDCARD: &str = "-";

/// Parsed `providers/{provider}/models/{model}` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelName {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelName {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    pub fn parse(name: &str) -> crate::Result<Self> {
        let mut segments = name.split('/');

        match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some("providers"), Some(provider), Some("models"), Some(model), None)
                if !provider.is_empty() && !model.is_empty() && provider != WILDCARD =>
            {
                Ok(Self::new(provider, model))
            }
            _ => Err(Error::InvalidResourceName(name.to_string())),
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "providers/{}/models/{}", self.provider_id, self.model_id)
    }
}

/// Parsed `providers/{provider}` parent; `providers/-` selects all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelParent {
    Provider(String),
    Wildcard,
}

impl ModelParent {
    pub fn parse(parent: &str) -> crate::Result<Self> {
        let mut segments = parent.split('/');

        match (segments.next(), segments.next(), segments.next()) {
            (Some("providers"), Some(WILDCARD), None) => Ok(Self::Wildcard),
            (Some("providers"), Some(provider), None) if !provider.is_empty() => {
                Ok(Self::Provider(provider.to_string()))
            }
            _ => Err(Error::InvalidResourceName(parent.to_string())),
        }
    }

    pub fn matches(&self, provider_id: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Provider(id) => id == provider_id,
        }
    }
}

/// Parsed `voices/{voice}` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceName {
    pub voice_id: String,
}

impl VoiceName {
    pub fn parse(name: &str) -> crate::Result<Self> {
        let mut segments = name.split('/');

        match (segments.next(), segments.next(), segments.next()) {
            (Some("voices"), Some(voice), None) if !voice.is_empty() => Ok(Self {
                voice_id: voice.to_string(),
            }),
            _ => Err(Error::InvalidResourceName(name.to_string())),
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voices/{}", self.voice_id)
    }
}
