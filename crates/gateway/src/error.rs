use std::collections::BTreeMap;

use thiserror::Error;

use crate::messages::{request::ToolResult, response::ToolCall};

pub type Result<T> = std::result::Result<T, Error>;

/// gRPC-style status codes surfaced by the gateway.
///
/// The RPC transport is out of scope for this crate; callers translate
/// these codes into their framing of choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
    Canceled,
    DeadlineExceeded,
    Unknown,
}

/// Gateway errors with gRPC-status semantics.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed resource name (model, voice or provider).
    #[error("invalid resource name: '{0}'")]
    InvalidResourceName(String),

    /// Invalid request parameters (unknown tool-choice mode, unsupported
    /// media type, missing configuration event, bad page token).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown model resource name.
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    /// Unknown voice resource name.
    #[error("voice '{0}' not found")]
    VoiceNotFound(String),

    /// Unknown operation id.
    #[error("operation '{0}' not found")]
    OperationNotFound(String),

    /// Provider referenced by a model is not registered.
    #[error("provider '{0}' is not registered")]
    ProviderNotRegistered(String),

    /// The model exists but does not carry the requested capability.
    #[error("model '{model}' does not support {capability}")]
    CapabilityMismatch { model: String, capability: &'static str },

    /// The model's deprecation timestamp is in the past.
    #[error("model '{0}' is deprecated")]
    ModelDeprecated(String),

    /// Upstream HTTP failure, propagated with the provider's status code.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Network or connection failure talking to an upstream.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol violation: unknown event variant, stop-reason map miss,
    /// metrics ordering violation.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The model referenced a tool the request never declared. The detail
    /// carries the original block plus a synthetic tool-result error block
    /// so callers can surface the failure back into a model turn.
    #[error("unknown tool '{}' referenced by model", .0.original.name)]
    UnknownTool(Box<ToolCallRecoverableError>),

    /// Tool-call argument JSON failed strict parsing.
    #[error("tool call arguments failed to parse: {}", .0.metadata.get("error").map(String::as_str).unwrap_or("unknown"))]
    ToolCallArguments(Box<ErrorInfo>),

    /// `extract_json_object` post-processing found no parseable object.
    #[error("failed to extract JSON object from model output")]
    JsonExtract(Box<ErrorInfo>),

    /// Context cancellation.
    #[error("operation canceled")]
    Canceled,

    /// Context deadline expired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Internal error. If Some(message), it came from a provider and can
    /// be shown; if None, details must not leak.
    #[error("internal error")]
    Internal(Option<String>),

    /// Anything that does not map onto a known status.
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// Project this error onto its gRPC-style status code.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidResourceName(_) | Self::InvalidRequest(_) | Self::CapabilityMismatch { .. } => {
                Code::InvalidArgument
            }
            Self::ModelNotFound(_) | Self::VoiceNotFound(_) | Self::OperationNotFound(_) => Code::NotFound,
            Self::ProviderNotRegistered(_) | Self::ModelDeprecated(_) => Code::FailedPrecondition,
            Self::Upstream { status, .. } => match *status {
                400 => Code::InvalidArgument,
                404 => Code::NotFound,
                429 => Code::ResourceExhausted,
                _ => Code::Unavailable,
            },
            Self::Connection(_) => Code::Unavailable,
            Self::Protocol(_) | Self::UnknownTool(_) | Self::ToolCallArguments(_) | Self::Internal(_) => {
                Code::Internal
            }
            Self::JsonExtract(_) => Code::Internal,
            Self::Canceled => Code::Canceled,
            Self::DeadlineExceeded => Code::DeadlineExceeded,
            Self::Unknown(_) => Code::Unknown,
        }
    }

    /// Map an upstream HTTP error response onto a gateway error.
    pub fn from_upstream_status(status: u16, message: String) -> Self {
        log::error!("upstream API error ({status}): {message}");

        Self::Upstream { status, message }
    }
}

/// Structured machine-readable error detail, modeled after
/// `google.rpc.ErrorInfo`. Attached to Internal errors for tool-call and
/// JSON-extract parse failures, including the offending raw payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    pub reason: String,
    pub domain: String,
    pub metadata: BTreeMap<String, String>,
}

pub const REASON_TOOL_CALL_ARGUMENT_UNMARSHAL: &str = "TOOL_CALL_ARGUMENT_UNMARSHAL";
pub const REASON_JSON_EXTRACT: &str = "JSON_EXTRACT";
pub const ERROR_DOMAIN: &str = "gateway.switchboard.dev";

impl ErrorInfo {
    pub fn new(reason: &str, metadata: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            reason: reason.to_string(),
            domain: ERROR_DOMAIN.to_string(),
            metadata: metadata.into_iter().collect(),
        }
    }
}

/// Detail attached when the model calls a tool the request never declared.
///
/// Carries both sides of a recovery turn: the original tool-call block and
/// a synthetic tool-result block holding the error text, so a caller can
/// feed the failure straight back to the model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecoverableError {
    pub original: ToolCall,
    pub synthetic_result: SyntheticToolResult,
}

/// The synthetic tool-result half of [`ToolCallRecoverableError`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyntheticToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: ToolResult,
}

impl ToolCallRecoverableError {
    pub fn unknown_tool(original: ToolCall) -> Self {
        let synthetic_result = SyntheticToolResult {
            tool_call_id: original.id.clone(),
            tool_name: original.name.clone(),
            result: ToolResult::Error(format!("unknown tool: '{}'", original.name)),
        };

        Self {
            original,
            synthetic_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_projection_covers_request_validation() {
        assert_eq!(Error::InvalidResourceName("x".into()).code(), Code::InvalidArgument);
        assert_eq!(Error::ModelNotFound("m".into()).code(), Code::NotFound);
        assert_eq!(Error::ModelDeprecated("m".into()).code(), Code::FailedPrecondition);
        // Asking a model for a capability it does not have is the caller's
        // mistake; a missing provider or adapter is a deployment problem.
        assert_eq!(
            Error::CapabilityMismatch {
                model: "m".into(),
                capability: "text-to-text"
            }
            .code(),
            Code::InvalidArgument
        );
        assert_eq!(
            Error::ProviderNotRegistered("p".into()).code(),
            Code::FailedPrecondition
        );
    }

    #[test]
    fn upstream_status_maps_client_errors() {
        assert_eq!(Error::from_upstream_status(400, String::new()).code(), Code::InvalidArgument);
        assert_eq!(Error::from_upstream_status(404, String::new()).code(), Code::NotFound);
        assert_eq!(
            Error::from_upstream_status(429, String::new()).code(),
            Code::ResourceExhausted
        );
        assert_eq!(Error::from_upstream_status(500, String::new()).code(), Code::Unavailable);
        assert_eq!(Error::from_upstream_status(503, String::new()).code(), Code::Unavailable);
    }

    #[test]
    fn unknown_tool_detail_carries_both_blocks() {
        let call = ToolCall {
            id: "t1".into(),
            name: "ghost".into(),
            arguments: serde_json::json!({}),
            annotations: Default::default(),
        };

        let detail = ToolCallRecoverableError::unknown_tool(call);

        assert_eq!(detail.original.name, "ghost");
        assert_eq!(detail.synthetic_result.tool_call_id, "t1");
        match &detail.synthetic_result.result {
            ToolResult::Error(message) => assert!(message.contains("unknown tool")),
            other => panic!("expected error result, got {other:?}"),
        }
    }
}
