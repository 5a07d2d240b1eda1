//! Canonical request/response types for the gateway.
//!
//! Every provider adapter translates between these types and its upstream's
//! wire format. The conversion flow follows this pattern:
//!
//! ```text
//! Canonical request → adapter input → upstream → adapter output → canonical events
//! ```
//!
//! All variant-bearing entities (messages, content blocks, tool results,
//! stream events) are sum types matched exhaustively; an unexpected variant
//! from an upstream is a protocol violation, never a silent skip.

pub mod audio;
pub mod request;
pub mod response;
