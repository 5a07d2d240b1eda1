//! Multi-provider AI gateway core.
//!
//! A unified streaming surface for three capability families — text-to-text,
//! speech-to-text and text-to-speech — in front of heterogeneous upstream
//! providers (OpenAI-compatible endpoints, Anthropic, Google GenAI,
//! ElevenLabs, Cartesia, xAI, Groq, Cerebras).
//!
//! The crate is transport-agnostic: the RPC layer hands in a
//! [`sender::ServerStream`] and everything else happens here — model and
//! voice registry with capability gating, bidirectional stream translation
//! through per-provider adapters, tool-call reassembly with streaming JSON
//! healing, post-processing (annotations, partial dedupe, pricing) and an
//! in-memory manager for long-running operations.

pub mod catalog;
pub mod error;
pub mod messages;
pub mod operation;
pub mod partial_json;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod sender;
pub mod service;
pub mod toolcall;

pub use error::{Code, Error, Result};
pub use registry::Registry;
pub use service::Gateway;
