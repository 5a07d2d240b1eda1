//! Post-processing interceptor over the server stream.
//!
//! Wraps the adapter-facing stream and observes every outgoing event:
//! tool-call blocks get their declared annotations copied on (an unknown
//! tool fails the stream with a recoverable detail), equal consecutive
//! partials for a call id are dropped, and usage reports are merge-summed
//! onto a running total with pricing applied before emission.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::catalog::Pricing;
use crate::error::{Error, ToolCallRecoverableError};
use crate::messages::request::TextToTextRequest;
use crate::messages::response::{ModelUsage, PartialToolCall, StreamEvent, ToolCall};
use crate::sender::ServerStream;

pub(crate) struct PostProcessor {
    inner: Box<dyn ServerStream>,
    /// tool name → annotations, from the request's tool declarations.
    annotations: BTreeMap<String, BTreeMap<String, String>>,
    /// call id → last forwarded partial, for structural dedupe.
    last_partials: HashMap<String, PartialToolCall>,
    usage_total: ModelUsage,
    pricing: Option<Pricing>,
    ttfb_seen: bool,
    content_seen: bool,
}

impl PostProcessor {
    pub(crate) fn new(inner: Box<dyn ServerStream>, request: &TextToTextRequest, pricing: Option<Pricing>) -> Self {
        let annotations = request
            .tools
            .iter()
            .map(|tool| (tool.name.clone(), tool.annotations.clone()))
            .collect();

        Self {
            inner,
            annotations,
            last_partials: HashMap::new(),
            usage_total: ModelUsage::default(),
            pricing,
            ttfb_seen: false,
            content_seen: false,
        }
    }

    /// Annotations for a declared tool; an undeclared name is the model
    /// hallucinating a tool, surfaced with a recovery detail.
    fn annotations_for(&self, id: &str, name: &str, arguments: serde_json::Value) -> crate::Result<BTreeMap<String, String>> {
        match self.annotations.get(name) {
            Some(annotations) => Ok(annotations.clone()),
            None => Err(Error::UnknownTool(Box::new(ToolCallRecoverableError::unknown_tool(
                ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                    annotations: BTreeMap::new(),
                },
            )))),
        }
    }
}

#[async_trait]
impl ServerStream for PostProcessor {
    fn context(&self) -> &CancellationToken {
        self.inner.context()
    }

    async fn send(&mut self, event: StreamEvent) -> crate::Result<()> {
        let event = match event {
            StreamEvent::ToolCall(mut call) => {
                call.annotations = self.annotations_for(&call.id, &call.name, call.arguments.clone())?;
                self.last_partials.remove(&call.id);
                self.content_seen = true;
                StreamEvent::ToolCall(call)
            }

            StreamEvent::PartialToolCall(mut partial) => {
                let arguments =
                    serde_json::from_str(&partial.arguments).unwrap_or(serde_json::Value::Null);
                partial.annotations = self.annotations_for(&partial.id, &partial.name, arguments)?;

                // Structurally equal consecutive partials carry no new
                // information.
                if self.last_partials.get(&partial.id) == Some(&partial) {
                    return Ok(());
                }

                self.last_partials.insert(partial.id.clone(), partial.clone());
                self.content_seen = true;
                StreamEvent::PartialToolCall(partial)
            }

            StreamEvent::ModelUsage(usage) => {
                if usage.is_empty() {
                    return Ok(());
                }

                self.usage_total.merge(&usage);

                let mut enriched = self.usage_total;
                if let Some(pricing) = &self.pricing {
                    pricing.apply(&mut enriched);
                }

                StreamEvent::ModelUsage(enriched)
            }

            StreamEvent::GenerationMetrics(metrics) => {
                if metrics.ttfb.is_some() {
                    if self.ttfb_seen {
                        return Err(Error::Protocol("duplicate ttfb metric".into()));
                    }
                    if self.content_seen {
                        return Err(Error::Protocol("ttfb metric after content".into()));
                    }
                    self.ttfb_seen = true;
                }

                StreamEvent::GenerationMetrics(metrics)
            }

            other => {
                self.content_seen = true;
                other
            }
        };

        self.inner.send(event).await
    }
}
